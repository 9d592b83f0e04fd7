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

use std::collections::HashSet;
use std::fmt;

/// A set of strings which iterates in insertion order.
///
/// Removal is linear in the size of the set, which is fine for the folder
/// lists this is used for.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct OrderedSet {
    order: Vec<String>,
    present: HashSet<String>,
}

impl fmt::Debug for OrderedSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.order.iter()).finish()
    }
}

impl OrderedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `item` at the end of the set, unless it is already present.
    pub fn add(&mut self, item: &str) {
        if self.present.insert(item.to_owned()) {
            self.order.push(item.to_owned());
        }
    }

    /// Remove `item` if present. Returns whether anything was removed.
    pub fn remove(&mut self, item: &str) -> bool {
        if self.present.remove(item) {
            self.order.retain(|i| i != item);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, item: &str) -> bool {
        self.present.contains(item)
    }

    /// The entries in the order they were first added.
    pub fn ordered_entries(&self) -> &[String] {
        &self.order
    }

    /// Retain only entries that are also in `other`.
    ///
    /// Returns the removed entries, in their original order.
    pub fn keep_union(&mut self, other: &OrderedSet) -> Vec<String> {
        let (kept, removed): (Vec<String>, Vec<String>) = self
            .order
            .drain(..)
            .partition(|item| other.contains(item));
        for item in &removed {
            self.present.remove(item);
        }
        self.order = kept;
        removed
    }
}

impl<'a> std::iter::FromIterator<&'a str> for OrderedSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut this = OrderedSet::new();
        for item in iter {
            this.add(item);
        }
        this
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keeps_insertion_order() {
        let mut set = OrderedSet::new();
        set.add("b");
        set.add("a");
        set.add("b");
        set.add("c");
        assert_eq!(&["b", "a", "c"], set.ordered_entries());

        assert!(set.remove("a"));
        assert!(!set.remove("a"));
        assert_eq!(&["b", "c"], set.ordered_entries());

        set.add("a");
        assert_eq!(&["b", "c", "a"], set.ordered_entries());
        assert!(set.contains("a"));
    }

    #[test]
    fn keep_union_reports_removed() {
        let mut set: OrderedSet =
            vec!["x", "y", "z", "w"].into_iter().collect();
        let other: OrderedSet = vec!["w", "y"].into_iter().collect();

        let removed = set.keep_union(&other);
        assert_eq!(vec!["x".to_owned(), "z".to_owned()], removed);
        assert_eq!(&["y", "w"], set.ordered_entries());
        assert!(!set.contains("x"));
    }
}
