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

//! Writing values the way IMAP's lexical rules want them.
//!
//! Strings go out as atoms only when made entirely of `a-zA-Z0-9?=+/_.-`
//! and not spelling `NIL`. Otherwise short printable ASCII without `"` or
//! `\` is quoted, and anything else becomes a literal.
//!
//! Message content is always a literal, byte for byte, even with 8-bit or
//! NUL bytes in it.

use std::fmt::Display;

use chrono::prelude::*;

/// Accumulates one response in memory.
#[derive(Clone, Debug, Default)]
pub struct LexWriter {
    out: Vec<u8>,
}

impl LexWriter {
    pub fn new() -> Self {
        LexWriter::default()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.out
    }

    pub fn verbatim(&mut self, s: &str) {
        self.out.extend_from_slice(s.as_bytes());
    }

    pub fn astring(&mut self, s: &str) {
        if is_conservative_atom(s) {
            self.verbatim(s);
        } else {
            self.string(s);
        }
    }

    pub fn string(&mut self, s: &str) {
        if is_quotable(s) {
            self.out.push(b'"');
            self.verbatim(s);
            self.out.push(b'"');
        } else {
            self.literal(s.as_bytes());
        }
    }

    pub fn mailbox(&mut self, name: &str) {
        self.astring(name)
    }

    pub fn literal(&mut self, data: &[u8]) {
        self.verbatim(&format!("{{{}}}\r\n", data.len()));
        self.out.extend_from_slice(data);
    }

    pub fn flag(&mut self, flag: &impl Display) {
        self.verbatim(&flag.to_string())
    }

    pub fn datetime(&mut self, datetime: &DateTime<FixedOffset>) {
        self.verbatim(&format!(
            "\"{}\"",
            datetime.format("%d-%b-%Y %H:%M:%S %z")
        ))
    }

    pub fn num(&mut self, value: impl Into<u64>) {
        self.verbatim(&value.into().to_string())
    }
}

fn is_conservative_atom(s: &str) -> bool {
    !"nil".eq_ignore_ascii_case(s)
        && !s.is_empty()
        && s.as_bytes().iter().copied().all(|b| {
            matches!(
                b,
                b'a'..=b'z'
                    | b'A'..=b'Z'
                    | b'0'..=b'9'
                    | b'='
                    | b'?'
                    | b'/'
                    | b'+'
                    | b'_'
                    | b'.'
                    | b'-'
            )
        })
}

fn is_quotable(s: &str) -> bool {
    s.len() < 100
        && s.as_bytes().iter().copied().all(|b| match b {
            0..=31 | 127..=255 | b'\\' | b'"' => false,
            _ => true,
        })
}

#[cfg(test)]
mod test {
    use super::*;

    fn to_str(l: LexWriter) -> String {
        String::from_utf8(l.into_inner()).unwrap()
    }

    #[test]
    fn astring_forms() {
        let mut l = LexWriter::new();
        l.astring("INBOX");
        l.verbatim(" ");
        l.astring("nil");
        l.verbatim(" ");
        l.astring("");
        l.verbatim(" ");
        l.astring("[Gmail].All Mail");
        l.verbatim(" ");
        l.astring("back\\slash");
        l.verbatim(" ");
        l.astring("Entwürfe");
        assert_eq!(
            "INBOX \"nil\" \"\" \"[Gmail].All Mail\" {10}\r\nback\\slash \
             {9}\r\nEntwürfe",
            to_str(l)
        );
    }

    #[test]
    fn long_strings_become_literals() {
        let long = "x ".repeat(60);
        let mut l = LexWriter::new();
        l.string(&long);
        assert_eq!(format!("{{120}}\r\n{}", long), to_str(l));
    }

    #[test]
    fn literal_is_verbatim() {
        let mut l = LexWriter::new();
        l.literal(b"a\0b\r\n");
        assert_eq!(b"{5}\r\na\0b\r\n".to_vec(), l.into_inner());
    }

    #[test]
    fn datetime_and_numbers() {
        let mut l = LexWriter::new();
        l.datetime(&FixedOffset::west(5 * 3600).ymd(2020, 3, 4).and_hms(
            5, 6, 7,
        ));
        l.verbatim(" ");
        l.num(42u32);
        assert_eq!("\"04-Mar-2020 05:06:07 -0500\" 42", to_str(l));
    }
}
