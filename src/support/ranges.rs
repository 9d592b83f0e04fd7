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

//! Half-open ranges of one-based message sequence numbers.

use std::fmt;
use std::str::FromStr;

use crate::support::error::Error;

/// A half-open range `[start, end)` of sequence numbers.
///
/// User-supplied ranges may carry negative endpoints, meaning "count back from
/// the end"; `canonicalise_ranges` resolves those.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Range {
    pub start: i64,
    pub end: i64,
}

impl Range {
    pub fn new(start: i64, end: i64) -> Self {
        Range { start, end }
    }

    pub fn len(&self) -> i64 {
        self.end - self.start
    }

    pub fn contains(&self, v: i64) -> bool {
        v >= self.start && v < self.end
    }

    /// Format as an IMAP sequence set covering the same messages.
    pub fn to_seq_set(&self) -> String {
        if self.end - 1 == self.start {
            self.start.to_string()
        } else {
            format!("{}:{}", self.start, self.end - 1)
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

impl FromStr for Range {
    type Err = Error;

    /// Parse `start:end`, where either may be negative.
    fn from_str(s: &str) -> Result<Self, Error> {
        let mut parts = s.splitn(2, ':');
        match (parts.next(), parts.next()) {
            (Some(start), Some(end)) => {
                let start = start
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| Error::BadRange(s.to_owned()))?;
                let end = end
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| Error::BadRange(s.to_owned()))?;
                Ok(Range { start, end })
            }
            _ => Err(Error::BadRange(s.to_owned())),
        }
    }
}

/// Resolve negative endpoints against `max` and validate every range against
/// `[min, max]`.
///
/// A negative `start` becomes `max + start`, likewise for `end`; `start < 0`
/// together with `end == 0` means "through to `max`". Any invalid range
/// fails the whole batch.
pub fn canonicalise_ranges(
    ranges: &[Range],
    min: i64,
    max: i64,
) -> Result<Vec<Range>, Error> {
    ranges
        .iter()
        .map(|&r| {
            let mut resolved = r;
            if r.start < 0 {
                resolved.start = max + r.start;
            }
            if r.end < 0 {
                resolved.end = max + r.end;
            }
            if r.start < 0 && 0 == r.end {
                resolved.end = max;
            }

            if resolved.start < min
                || resolved.end > max
                || resolved.end <= resolved.start
            {
                return Err(Error::InvalidRange {
                    start: r.start,
                    end: r.end,
                    min,
                    max,
                });
            }

            Ok(resolved)
        })
        .collect()
}

/// The total number of elements covered by `ranges`.
pub fn accumulate_ranges(ranges: &[Range]) -> i64 {
    ranges.iter().map(Range::len).sum()
}

/// Compress ascending `indices` into maximal contiguous runs.
pub fn compress_indices(indices: &[i64]) -> Vec<Range> {
    let mut ranges = Vec::<Range>::new();
    for &ix in indices {
        match ranges.last_mut() {
            Some(last) if last.end == ix => last.end += 1,
            _ => ranges.push(Range::new(ix, ix + 1)),
        }
    }
    ranges
}
