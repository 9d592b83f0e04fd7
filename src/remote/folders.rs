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

//! Resolution of user folder selectors against the server's folder list.
//!
//! Selectors are processed left to right:
//!
//! - `_ALL_` adds every folder, in the order the server listed them.
//! - `_Gmail_` adds the folders under `[Gmail]` or `[Google Mail]`.
//! - `-X` removes whatever `X` (which may itself be `_ALL_` or `_Gmail_`)
//!   would have added.
//! - Anything else names a single folder.
//!
//! The result only ever contains folders the server actually has, and is
//! sorted.

use log::warn;

use crate::support::ordered_set::OrderedSet;

pub const ALL: &str = "_ALL_";
pub const GMAIL: &str = "_Gmail_";

const GMAIL_PREFIXES: &[&str] = &["[Gmail]", "[Google Mail]"];

fn is_gmail(folder: &str) -> bool {
    GMAIL_PREFIXES.iter().any(|p| folder.starts_with(p))
}

/// The folders a single (non-negated) token stands for.
fn resolve<'a>(token: &'a str, available: &'a [String]) -> Vec<&'a str> {
    match token {
        ALL => available.iter().map(String::as_str).collect(),
        GMAIL => available
            .iter()
            .map(String::as_str)
            .filter(|f| is_gmail(f))
            .collect(),
        literal => vec![literal],
    }
}

/// Expand `specs` against `available`.
pub fn expand_folders(specs: &[String], available: &[String]) -> Vec<String> {
    let mut selected = OrderedSet::new();

    for spec in specs {
        if let Some(token) = spec.strip_prefix('-') {
            let mut removed_any = false;
            for folder in resolve(token, available) {
                removed_any |= selected.remove(folder);
            }

            if !removed_any && ALL != token && GMAIL != token {
                warn!("Folder {:?} was not selected, cannot remove it", token);
            }
        } else {
            for folder in resolve(spec, available) {
                selected.add(folder);
            }
        }
    }

    let available: OrderedSet =
        available.iter().map(String::as_str).collect();
    for missing in selected.keep_union(&available) {
        warn!("Folder {:?} does not exist on the server, skipping", missing);
    }

    let mut result = selected.ordered_entries().to_vec();
    result.sort();
    result
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn strings(s: &[&str]) -> Vec<String> {
        s.iter().map(|&s| s.to_owned()).collect()
    }

    fn available() -> Vec<String> {
        strings(&[
            "INBOX",
            "[Gmail]/All Mail",
            "Archive",
            "[Google Mail]/Sent Mail",
            "[Gmail]/Trash",
        ])
    }

    fn expand(specs: &[&str]) -> Vec<String> {
        expand_folders(&strings(specs), &available())
    }

    #[test]
    fn all_selects_everything_sorted() {
        assert_eq!(
            strings(&[
                "Archive",
                "INBOX",
                "[Gmail]/All Mail",
                "[Gmail]/Trash",
                "[Google Mail]/Sent Mail",
            ]),
            expand(&["_ALL_"])
        );
        assert!(expand(&["_ALL_", "-_ALL_"]).is_empty());
        assert!(expand(&[]).is_empty());
    }

    #[test]
    fn gmail_subtraction() {
        assert_eq!(
            strings(&["Archive", "INBOX"]),
            expand(&["_ALL_", "-_Gmail_"])
        );
        assert_eq!(
            strings(&["[Gmail]/All Mail", "[Google Mail]/Sent Mail"]),
            expand(&["_Gmail_", "-[Gmail]/Trash"])
        );
    }

    #[test]
    fn processing_is_left_to_right() {
        assert_eq!(strings(&["INBOX"]), expand(&["-INBOX", "INBOX"]));
        assert!(expand(&["INBOX", "-INBOX"]).is_empty());
        assert_eq!(
            strings(&["Archive"]),
            expand(&["_ALL_", "-_ALL_", "Archive"])
        );
    }

    #[test]
    fn nonexistent_folders_dropped() {
        assert_eq!(strings(&["INBOX"]), expand(&["INBOX", "Nope"]));
        assert!(expand(&["-Nope"]).is_empty());
    }

    proptest! {
        #[test]
        fn result_is_sorted_subset(
            available in prop::collection::vec("[a-d]{1,2}", 0..8),
            specs in prop::collection::vec(
                "-?([a-d]{1,2}|_ALL_|_Gmail_)", 0..8),
        ) {
            let result = expand_folders(&specs, &available);
            let mut sorted = result.clone();
            sorted.sort();
            sorted.dedup();
            prop_assert_eq!(&sorted, &result);
            for folder in &result {
                prop_assert!(available.contains(folder));
            }

            let mut all = available.clone();
            all.sort();
            all.dedup();
            prop_assert_eq!(
                all,
                expand_folders(&strings(&["_ALL_"]), &available)
            );
        }
    }
}
