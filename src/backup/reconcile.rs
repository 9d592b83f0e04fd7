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

//! Working out which remote messages a folder backup still lacks.

use std::collections::HashSet;

use crate::maildir::oldmail::OldmailEntry;
use crate::remote::session::Uid;
use crate::support::error::{DataSource, Error};
use crate::support::ranges::{compress_indices, Range};

/// Compute the sequence number ranges of the messages in `retrieved` (the
/// server's UID list, in sequence order) that `stored` does not know about.
///
/// If `window` is given, only sequence numbers inside one of its (already
/// canonical) ranges are considered.
///
/// Fails with `UidValidityDrift` if the server's UIDs do not share one UID
/// validity, or if the stored entries have a different one; in that case
/// the local state no longer describes the remote mailbox.
pub fn missing_ranges(
    stored: &[OldmailEntry],
    retrieved: &[Uid],
    window: Option<&[Range]>,
) -> Result<Vec<Range>, Error> {
    let validity = match retrieved.first() {
        Some(first) => first.validity,
        None => return Ok(vec![]),
    };

    if retrieved.iter().any(|u| u.validity != validity) {
        return Err(Error::UidValidityDrift(DataSource::Retrieved));
    }
    if stored.iter().any(|e| e.uid_validity != validity) {
        return Err(Error::UidValidityDrift(DataSource::Stored));
    }

    let known = stored.iter().map(|e| e.uid).collect::<HashSet<_>>();
    let missing = retrieved
        .iter()
        .zip(1i64..)
        .filter(|&(u, _)| !known.contains(&u.uid))
        .map(|(_, seqnum)| seqnum)
        .filter(|&seqnum| {
            window.map_or(true, |w| w.iter().any(|r| r.contains(seqnum)))
        })
        .collect::<Vec<_>>();

    Ok(compress_indices(&missing))
}
