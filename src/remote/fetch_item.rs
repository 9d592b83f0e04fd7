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

//! Extraction of a deliverable message from a raw fetch response.

use chrono::prelude::*;

use crate::maildir::oldmail::OldmailEntry;
use crate::support::error::Error;

/// One attribute of a fetch response, in whatever order the server sent
/// them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchItem {
    Uid(u32),
    Timestamp(DateTime<FixedOffset>),
    /// The name of the section whose content follows, e.g. `RFC822`.
    HeaderName(String),
    Body(Vec<u8>),
}

/// The minimum needed to deliver a message and remember it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Email {
    pub uid: u32,
    /// Server INTERNALDATE, UNIX seconds.
    pub timestamp: i64,
    pub body: Vec<u8>,
}

/// Assign `value` to `slot`, failing if it was already assigned.
fn set_once<T>(
    slot: &mut Option<T>,
    value: T,
    what: &'static str,
) -> Result<(), Error> {
    if slot.is_some() {
        return Err(Error::FetchItemDuplicate(what));
    }
    *slot = Some(value);
    Ok(())
}

impl Email {
    /// Build an `Email` from the items of one fetch response.
    ///
    /// Each of the UID, timestamp, section name and body may appear at most
    /// once. The section name must name an RFC822 section and precede the
    /// body.
    pub fn from_items(items: Vec<FetchItem>) -> Result<Self, Error> {
        let mut uid = None;
        let mut timestamp = None;
        let mut header = None;
        let mut body = None;

        for item in items {
            match item {
                FetchItem::Uid(v) => set_once(&mut uid, v, "UID")?,
                FetchItem::Timestamp(v) => {
                    set_once(&mut timestamp, v.timestamp(), "INTERNALDATE")?
                }
                FetchItem::HeaderName(name) => {
                    if !name.to_ascii_lowercase().contains("rfc822") {
                        return Err(Error::FetchItemUnexpected(name));
                    }
                    set_once(&mut header, name, "section name")?;
                }
                FetchItem::Body(data) => {
                    if header.is_none() {
                        return Err(Error::FetchItemMissing("section name"));
                    }
                    set_once(&mut body, data, "RFC822 body")?;
                }
            }
        }

        Ok(Email {
            uid: uid.ok_or(Error::FetchItemMissing("UID"))?,
            timestamp: timestamp
                .ok_or(Error::FetchItemMissing("INTERNALDATE"))?,
            body: body.ok_or(Error::FetchItemMissing("RFC822 body"))?,
        })
    }

    pub fn oldmail_entry(&self, uid_validity: u32) -> OldmailEntry {
        OldmailEntry {
            uid_validity,
            uid: self.uid,
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn date() -> DateTime<FixedOffset> {
        FixedOffset::east(3600).ymd(2020, 5, 17).and_hms(10, 20, 30)
    }

    fn complete() -> Vec<FetchItem> {
        vec![
            FetchItem::Uid(7),
            FetchItem::Timestamp(date()),
            FetchItem::HeaderName("RFC822".to_owned()),
            FetchItem::Body(b"Subject: x\r\n\r\n".to_vec()),
        ]
    }

    #[test]
    fn order_does_not_matter() {
        let mut items = complete();
        items.reverse();
        // The section name still has to come before its content
        items.swap(0, 1);

        let email = Email::from_items(items).unwrap();
        assert_eq!(7, email.uid);
        assert_eq!(date().timestamp(), email.timestamp);
        assert_eq!(b"Subject: x\r\n\r\n".to_vec(), email.body);
        assert_eq!(
            OldmailEntry {
                uid_validity: 42,
                uid: 7,
                timestamp: date().timestamp(),
            },
            email.oldmail_entry(42)
        );
    }

    #[test]
    fn missing_items_fail() {
        for drop_ix in 0..4 {
            let mut items = complete();
            items.remove(drop_ix);
            assert!(
                Email::from_items(items).is_err(),
                "Dropping {} did not fail",
                drop_ix
            );
        }
    }

    #[test]
    fn duplicate_items_fail() {
        let mut items = complete();
        items.push(FetchItem::Uid(8));
        assert_matches!(
            Err(Error::FetchItemDuplicate("UID")),
            Email::from_items(items)
        );

        let mut items = complete();
        items.push(FetchItem::Body(vec![]));
        assert_matches!(
            Err(Error::FetchItemDuplicate(_)),
            Email::from_items(items)
        );
    }

    #[test]
    fn non_rfc822_section_fails() {
        let mut items = complete();
        items[2] = FetchItem::HeaderName("BODY[HEADER]".to_owned());
        assert_matches!(
            Err(Error::FetchItemUnexpected(_)),
            Email::from_items(items)
        );

        let mut items = complete();
        items[2] = FetchItem::HeaderName("body[]<rfc822>".to_owned());
        assert!(Email::from_items(items).is_ok());
    }
}
