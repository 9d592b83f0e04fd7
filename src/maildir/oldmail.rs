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

//! The "oldmail" state file, which remembers which remote messages a folder
//! backup already contains.
//!
//! There is one file per folder, stored in the Maildir base directory and
//! named `oldmail-<server>-<port>-<user>-<folder>`. Each line is
//!
//! ```text
//! <uidvalidity> "/" <uid> NUL <timestamp> LF
//! ```
//!
//! with all numbers in decimal and the timestamp being the server's
//! INTERNALDATE in UNIX seconds. Lines are in download order.
//!
//! Older writers used `_` instead of NUL; both are accepted on reading, but
//! only NUL is ever written.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str;

use log::info;
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit1},
    combinator::{all_consuming, map_res, opt, recognize},
    sequence::pair,
    IResult,
};

use super::layout::STATE_MODE;
use crate::support::error::Error;
use crate::support::file_ops;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OldmailEntry {
    pub uid_validity: u32,
    pub uid: u32,
    /// Server INTERNALDATE, UNIX seconds.
    pub timestamp: i64,
}

/// The name of the state file for the given account and folder.
pub fn file_name(server: &str, port: u16, user: &str, folder: &str) -> String {
    format!("oldmail-{}-{}-{}-{}", server, port, user, folder)
}

/// The full path of the state file for the given account and folder under
/// `base`.
pub fn path(
    base: &Path,
    server: &str,
    port: u16,
    user: &str,
    folder: &str,
) -> PathBuf {
    base.join(file_name(server, port, user, folder))
}

fn parse_u32(i: &[u8]) -> IResult<&[u8], u32> {
    map_res(map_res(digit1, str::from_utf8), str::parse::<u32>)(i)
}

fn parse_i64(i: &[u8]) -> IResult<&[u8], i64> {
    map_res(
        map_res(recognize(pair(opt(char('-')), digit1)), str::from_utf8),
        str::parse::<i64>,
    )(i)
}

fn entry(i: &[u8]) -> IResult<&[u8], OldmailEntry> {
    let (i, uid_validity) = parse_u32(i)?;
    let (i, _) = tag("/")(i)?;
    let (i, uid) = parse_u32(i)?;
    let (i, _) = alt((tag("\0"), tag("_")))(i)?;
    let (i, timestamp) = parse_i64(i)?;
    Ok((
        i,
        OldmailEntry {
            uid_validity,
            uid,
            timestamp,
        },
    ))
}

/// Decode the content of a state file. `path` is only used for errors.
pub fn decode(data: &[u8], path: &Path) -> Result<Vec<OldmailEntry>, Error> {
    let mut lines = data.split(|&b| b'\n' == b).collect::<Vec<_>>();
    // A well-formed file ends with LF, leaving an empty trailing piece
    if lines.last().map_or(false, |l| l.is_empty()) {
        lines.pop();
    }

    lines
        .into_iter()
        .enumerate()
        .map(|(ix, line)| {
            all_consuming(entry)(line)
                .map(|(_, entry)| entry)
                .map_err(|_| Error::OldmailParse {
                    path: path.to_owned(),
                    line: ix + 1,
                    text: String::from_utf8_lossy(line).replace('\0', "\\0"),
                })
        })
        .collect()
}

/// Encode `entries` in state file format.
pub fn encode(entries: &[OldmailEntry]) -> Vec<u8> {
    let mut data = Vec::with_capacity(entries.len() * 24);
    for e in entries {
        data.extend_from_slice(
            format!("{}/{}_{}\n", e.uid_validity, e.uid, e.timestamp)
                .replace('_', "\0")
                .as_bytes(),
        );
    }
    data
}

/// Read the state file at `path`, which must exist.
pub fn read(path: &Path) -> Result<Vec<OldmailEntry>, Error> {
    let data = fs::read(path)?;
    decode(&data, path)
}

/// Replace the state file at `path` with `entries`.
pub fn write(entries: &[OldmailEntry], path: &Path) -> Result<(), Error> {
    if path.exists() {
        info!(
            "Overwriting {} with {} entries",
            path.display(),
            entries.len()
        );
    }

    file_ops::spit(path, STATE_MODE, &encode(entries)).map_err(
        |source: io::Error| Error::PersistIo {
            path: path.to_owned(),
            source,
        },
    )
}
