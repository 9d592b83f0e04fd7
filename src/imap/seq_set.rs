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

use std::fmt;

/// A set of message sequence numbers or UIDs, as given by an IMAP client.
///
/// Held as sorted, disjoint, non-adjacent inclusive runs. Since sequence
/// numbers and UIDs coincide in this server, there is no need to tell the
/// two apart.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SeqSet {
    runs: Vec<(u32, u32)>,
}

fn parse_number(raw: &str, splat: u32) -> Option<u32> {
    if "*" == raw {
        Some(splat)
    } else {
        raw.parse().ok().filter(|&v| 0 != v)
    }
}

impl SeqSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the IMAP form, e.g. `1:3,5,7:*`.
    ///
    /// `splat` is the value `*` stands for.
    pub fn parse(raw: &str, splat: u32) -> Option<Self> {
        let mut set = Self::new();
        for element in raw.split(',') {
            let (low, high) = match element.find(':') {
                None => {
                    let v = parse_number(element, splat)?;
                    (v, v)
                }
                Some(colon) => {
                    let a = parse_number(&element[..colon], splat)?;
                    let b = parse_number(&element[colon + 1..], splat)?;
                    // `7:3` means the same as `3:7`
                    (a.min(b), a.max(b))
                }
            };
            set.insert(low, high);
        }

        Some(set)
    }

    /// Add the inclusive range `low..=high`.
    pub fn insert(&mut self, mut low: u32, mut high: u32) {
        // First run which could touch the new one
        let first = self
            .runs
            .iter()
            .position(|&(_, end)| end.saturating_add(1) >= low)
            .unwrap_or(self.runs.len());
        // One past the last run which touches it
        let mut last = first;
        while last < self.runs.len()
            && self.runs[last].0 <= high.saturating_add(1)
        {
            low = low.min(self.runs[last].0);
            high = high.max(self.runs[last].1);
            last += 1;
        }

        self.runs.splice(first..last, Some((low, high)));
    }

    pub fn contains(&self, v: u32) -> bool {
        self.runs
            .binary_search_by(|&(start, end)| {
                if end < v {
                    std::cmp::Ordering::Less
                } else if start > v {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// The members of this set no greater than `max`, ascending.
    pub fn items(&self, max: u32) -> impl Iterator<Item = u32> + '_ {
        self.runs
            .iter()
            .take_while(move |&&(start, _)| start <= max)
            .flat_map(move |&(start, end)| start..=end.min(max))
    }
}

impl fmt::Display for SeqSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut sep = "";
        for &(start, end) in &self.runs {
            f.write_str(sep)?;
            sep = ",";
            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}:{}", start, end)?;
            }
        }

        Ok(())
    }
}

impl fmt::Debug for SeqSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SeqSet({})", self)
    }
}
