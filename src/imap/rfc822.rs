//-
// Copyright (c) 2026, The igrab developers
//
// This file is part of igrab.
//
// igrab is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// igrab is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// igrab. If not, see <http://www.gnu.org/licenses/>.

//! Just enough RFC 5322 structure to serve header and text sections and
//! evaluate header searches.
//!
//! Messages are never rewritten. Everything here returns slices of the
//! original bytes, so line endings and 8-bit content survive exactly.

use std::borrow::Cow;

use memchr::memchr_iter;

/// Split `data` into its header block and text.
///
/// The header block includes the blank line which terminates it. A message
/// with no blank line is all header.
pub fn split(data: &[u8]) -> (&[u8], &[u8]) {
    if data.starts_with(b"\r\n") {
        return data.split_at(2);
    } else if data.starts_with(b"\n") {
        return data.split_at(1);
    }

    for nl in memchr_iter(b'\n', data) {
        let rest = &data[nl + 1..];
        if rest.starts_with(b"\r\n") {
            return data.split_at(nl + 3);
        } else if rest.starts_with(b"\n") {
            return data.split_at(nl + 2);
        }
    }

    data.split_at(data.len())
}

/// One header field, including continuation lines and its line ending.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field<'a> {
    pub name: &'a str,
    pub raw: &'a [u8],
}

impl<'a> Field<'a> {
    /// The value with folding undone and surrounding whitespace trimmed.
    pub fn value(&self) -> Cow<'a, str> {
        let value = match memchr::memchr(b':', self.raw) {
            Some(colon) => &self.raw[colon + 1..],
            None => &[][..],
        };
        let value = String::from_utf8_lossy(value);
        if value.contains(|c| '\r' == c || '\n' == c) {
            Cow::Owned(
                value
                    .split(|c| '\r' == c || '\n' == c)
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join("")
                    .trim()
                    .to_owned(),
            )
        } else {
            match value {
                Cow::Borrowed(s) => Cow::Borrowed(s.trim()),
                Cow::Owned(s) => Cow::Owned(s.trim().to_owned()),
            }
        }
    }
}

/// Break the header block into fields.
///
/// Lines without a colon that are not continuations are skipped, as is the
/// terminating blank line.
pub fn fields(header: &[u8]) -> Vec<Field<'_>> {
    let mut lines = Vec::new();
    let mut start = 0;
    for nl in memchr_iter(b'\n', header) {
        lines.push((start, nl + 1));
        start = nl + 1;
    }
    if start < header.len() {
        lines.push((start, header.len()));
    }

    let mut fields: Vec<(usize, usize)> = Vec::new();
    for (start, end) in lines {
        let line = &header[start..end];
        if line.starts_with(b" ") || line.starts_with(b"\t") {
            if let Some(last) = fields.last_mut() {
                last.1 = end;
            }
            continue;
        }

        if memchr::memchr(b':', line).is_some() {
            fields.push((start, end));
        }
    }

    fields
        .into_iter()
        .filter_map(|(start, end)| {
            let raw = &header[start..end];
            let colon = memchr::memchr(b':', raw)?;
            let name = std::str::from_utf8(&raw[..colon]).ok()?.trim_end();
            Some(Field { name, raw })
        })
        .collect()
}

/// Build a `HEADER.FIELDS` (or `.NOT` if `not`) section.
pub fn header_fields(header: &[u8], names: &[String], not: bool) -> Vec<u8> {
    let mut out = Vec::new();
    for field in fields(header) {
        let listed = names.iter().any(|n| n.eq_ignore_ascii_case(field.name));
        if listed != not {
            out.extend_from_slice(field.raw);
        }
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Whether any field called `name` contains `needle`, case-insensitively.
///
/// An empty needle matches any message which has the field at all.
pub fn header_contains(header: &[u8], name: &str, needle: &str) -> bool {
    fields(header)
        .into_iter()
        .filter(|f| f.name.eq_ignore_ascii_case(name))
        .any(|f| contains_ci(f.value().as_bytes(), needle))
}

/// ASCII case-insensitive substring search.
pub fn contains_ci(haystack: &[u8], needle: &str) -> bool {
    let needle = needle.as_bytes();
    if needle.is_empty() {
        return true;
    }

    let first = needle[0];
    let candidates = memchr::memchr2_iter(
        first.to_ascii_lowercase(),
        first.to_ascii_uppercase(),
        haystack,
    );
    for ix in candidates {
        if haystack.len() - ix >= needle.len()
            && haystack[ix..ix + needle.len()].eq_ignore_ascii_case(needle)
        {
            return true;
        }
    }

    false
}
