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

//! The read-only view of a Maildir backup which the IMAP server exports.
//!
//! Every valid Maildir directly under the base directory becomes a mailbox
//! named after its directory. The messages of a mailbox are the union of
//! `new/` and `cur/`, ordered by modification time; sequence numbers and
//! UIDs coincide and `UIDVALIDITY` is always 1. The tree is scanned once at
//! start-up.
//!
//! Message bodies are read lazily and kept in a bounded cache. When
//! admitting a body would push the resident total over the limit, every
//! resident body is evicted first; nothing smarter is attempted.

use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use chrono::prelude::*;
use lazy_static::lazy_static;
use log::{info, warn};
use secstr::SecStr;

use super::rfc822;
use super::seq_set::SeqSet;
use super::syntax::SearchKey;
use crate::maildir::layout::{is_maildir, CUR, NEW};
use crate::support::error::Error;
use crate::support::safe_name::is_safe_name;

lazy_static! {
    /// The cache limit in bytes, from `IGRAB_MAX_SERVER_CACHE_MB`.
    pub static ref MAX_CACHE_BYTES: usize =
        env::var("IGRAB_MAX_SERVER_CACHE_MB")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(100)
            .saturating_mul(1_000_000);
}

pub const UID_VALIDITY: u32 = 1;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flag {
    Answered,
    Deleted,
    Draft,
    Flagged,
    Seen,
}

impl Flag {
    /// Decode the flags of a Maildir info suffix (`:2,FRS`).
    ///
    /// Everything in a backup counts as seen, whatever the suffix says.
    fn from_file_name(name: &str) -> Vec<Flag> {
        let mut flags = BTreeSet::new();
        flags.insert(Flag::Seen);

        if let Some(ix) = name.rfind(":2,") {
            for ch in name[ix + 3..].chars() {
                match ch {
                    'D' => flags.insert(Flag::Draft),
                    'F' => flags.insert(Flag::Flagged),
                    'R' => flags.insert(Flag::Answered),
                    'T' => flags.insert(Flag::Deleted),
                    _ => false,
                };
            }
        }

        flags.into_iter().collect()
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Flag::Answered => write!(f, "\\Answered"),
            Flag::Deleted => write!(f, "\\Deleted"),
            Flag::Draft => write!(f, "\\Draft"),
            Flag::Flagged => write!(f, "\\Flagged"),
            Flag::Seen => write!(f, "\\Seen"),
        }
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <Flag as fmt::Display>::fmt(self, f)
    }
}

/// Identifies a message across the whole backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct MessageRef {
    mailbox: usize,
    /// 0-based
    message: usize,
}

#[derive(Debug)]
pub struct Message {
    pub uid: u32,
    pub path: PathBuf,
    pub size: u64,
    pub internal_date: DateTime<FixedOffset>,
    pub flags: Vec<Flag>,
    /// `None` until read, and again after eviction.
    body: Mutex<Option<Arc<Vec<u8>>>>,
}

#[derive(Debug)]
pub struct Mailbox {
    pub name: String,
    pub messages: Vec<Message>,
    /// Union of the flags of all messages.
    pub flags: Vec<Flag>,
}

impl Mailbox {
    fn load(name: String, path: &Path) -> Result<Self, Error> {
        let mut found = Vec::new();
        for sub in &[NEW, CUR] {
            for entry in fs::read_dir(path.join(sub))? {
                let entry = entry?;
                let file_name =
                    entry.file_name().to_string_lossy().into_owned();
                if file_name.starts_with('.') {
                    continue;
                }

                let md = entry.metadata()?;
                if !md.is_file() {
                    continue;
                }

                let mtime = md.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                found.push((mtime, file_name, entry.path(), md.len()));
            }
        }

        found.sort();

        let mut flags = BTreeSet::new();
        let messages = found
            .into_iter()
            .enumerate()
            .map(|(ix, (mtime, file_name, path, size))| {
                let msg_flags = Flag::from_file_name(&file_name);
                flags.extend(msg_flags.iter().copied());
                Message {
                    uid: ix as u32 + 1,
                    path,
                    size,
                    internal_date: DateTime::<Utc>::from(mtime)
                        .with_timezone(&FixedOffset::east(0)),
                    flags: msg_flags,
                    body: Mutex::new(None),
                }
            })
            .collect::<Vec<_>>();

        Ok(Mailbox {
            name,
            messages,
            flags: flags.into_iter().collect(),
        })
    }

    pub fn len(&self) -> u32 {
        self.messages.len() as u32
    }

    /// `seq` is 1-based.
    pub fn message(&self, seq: u32) -> Option<&Message> {
        if 0 == seq {
            None
        } else {
            self.messages.get(seq as usize - 1)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub messages: u32,
    pub uid_next: u32,
    pub uid_validity: u32,
    pub recent: u32,
    pub unseen: u32,
    pub flags: Vec<Flag>,
    pub permanent_flags: Vec<&'static str>,
}

#[derive(Debug)]
struct Cache {
    limit: usize,
    resident: usize,
    members: Vec<MessageRef>,
}

impl Cache {
    /// Account for a newly read body of `size` bytes, returning whatever
    /// must be evicted to make room.
    fn admit(&mut self, id: MessageRef, size: usize) -> Vec<MessageRef> {
        let evicted = if size + self.resident > self.limit {
            self.resident = 0;
            mem::take(&mut self.members)
        } else {
            Vec::new()
        };

        self.resident += size;
        self.members.push(id);
        evicted
    }
}

pub struct Backend {
    user: String,
    password: SecStr,
    mailboxes: Vec<Mailbox>,
    cache: Mutex<Cache>,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Backend")
            .field("user", &self.user)
            .field("mailboxes", &self.mailboxes.len())
            .finish()
    }
}

impl Backend {
    /// Scan `base` for Maildirs.
    ///
    /// Only the credentials `user`/`password` will be accepted. Message
    /// bodies resident in memory are bounded by `cache_limit` bytes plus
    /// the size of the largest single message.
    pub fn load(
        base: &Path,
        user: &str,
        password: SecStr,
        cache_limit: usize,
    ) -> Result<Self, Error> {
        let mut mailboxes = Vec::new();
        for entry in fs::read_dir(base)? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(name) => {
                    warn!("Skipping non-UTF-8 directory {:?}", name);
                    continue;
                }
            };

            let path = entry.path();
            if !is_safe_name(&name) || !path.is_dir() {
                continue;
            }

            if !is_maildir(&path) {
                warn!("Skipping {}: not a maildir", path.display());
                continue;
            }

            mailboxes.push(Mailbox::load(name, &path)?);
        }

        mailboxes.sort_by(|a, b| a.name.cmp(&b.name));
        info!(
            "Serving {} mailboxes from {}",
            mailboxes.len(),
            base.display()
        );

        Ok(Backend {
            user: user.to_owned(),
            password,
            mailboxes,
            cache: Mutex::new(Cache {
                limit: cache_limit,
                resident: 0,
                members: Vec::new(),
            }),
        })
    }

    pub fn login(&self, user: &str, password: &str) -> Result<(), Error> {
        if user == self.user && SecStr::from(password) == self.password {
            Ok(())
        } else {
            Err(Error::AuthFailed)
        }
    }

    pub fn list_mailboxes(&self) -> &[Mailbox] {
        &self.mailboxes
    }

    /// Look a mailbox up by name, returning its index.
    pub fn get_mailbox(&self, name: &str) -> Result<usize, Error> {
        self.mailboxes
            .binary_search_by(|m| m.name.as_str().cmp(name))
            .map_err(|_| Error::NoSuchMailbox)
    }

    pub fn mailbox(&self, mailbox: usize) -> &Mailbox {
        &self.mailboxes[mailbox]
    }

    pub fn status(&self, mailbox: usize) -> Status {
        let mb = self.mailbox(mailbox);
        Status {
            messages: mb.len(),
            uid_next: mb.len() + 1,
            uid_validity: UID_VALIDITY,
            recent: 0,
            unseen: 0,
            flags: mb.flags.clone(),
            permanent_flags: vec!["\\*"],
        }
    }

    /// Resolve `seqset` to the sequence numbers of existing messages.
    pub fn list_messages(&self, mailbox: usize, seqset: &SeqSet) -> Vec<u32> {
        // `*` in an empty mailbox stands for 0
        seqset
            .items(self.mailbox(mailbox).len())
            .filter(|&seq| seq > 0)
            .collect()
    }

    /// Return the full content of message `seq` (1-based), reading it if
    /// it is not resident.
    pub fn message_body(
        &self,
        mailbox: usize,
        seq: u32,
    ) -> Result<Arc<Vec<u8>>, Error> {
        let message = self
            .mailbox(mailbox)
            .message(seq)
            .ok_or_else(|| Error::BadSequenceSet(seq.to_string()))?;

        let mut body = message.body.lock().unwrap();
        if let Some(ref data) = *body {
            return Ok(Arc::clone(data));
        }

        let data = Arc::new(fs::read(&message.path)?);
        let id = MessageRef {
            mailbox,
            message: seq as usize - 1,
        };
        let evicted = self.cache.lock().unwrap().admit(id, data.len());
        *body = Some(Arc::clone(&data));
        drop(body);

        // Only one body lock is held at a time, so this cannot deadlock
        // against another reader waiting on the cache.
        for evictee in evicted {
            let message = &self.mailboxes[evictee.mailbox].messages
                [evictee.message];
            *message.body.lock().unwrap() = None;
        }

        Ok(data)
    }

    /// Return the sequence numbers of the messages matching all of `keys`.
    pub fn search_messages(
        &self,
        mailbox: usize,
        keys: &[SearchKey],
    ) -> Result<Vec<u32>, Error> {
        let mut hits = Vec::new();
        for seq in 1..=self.mailbox(mailbox).len() {
            let mut candidate = Candidate {
                backend: self,
                mailbox,
                seq,
                body: None,
            };
            if candidate.matches_all(keys)? {
                hits.push(seq);
            }
        }
        Ok(hits)
    }

    pub fn create_message(&self) -> Result<(), Error> {
        Err(Error::ReadOnly)
    }

    pub fn copy_messages(&self, _mailbox: usize) -> Result<(), Error> {
        Err(Error::ReadOnly)
    }

    pub fn store(&self, _mailbox: usize) -> Result<(), Error> {
        Err(Error::ReadOnly)
    }

    pub fn expunge(&self, _mailbox: usize) -> Result<(), Error> {
        Err(Error::ReadOnly)
    }

    pub fn delete_mailbox(&self, _name: &str) -> Result<(), Error> {
        Err(Error::ReadOnly)
    }

    pub fn rename_mailbox(&self) -> Result<(), Error> {
        Err(Error::ReadOnly)
    }

    pub fn create_mailbox(&self, _name: &str) -> Result<(), Error> {
        Ok(())
    }

    pub fn set_subscribed(&self, _name: &str, _sub: bool) -> Result<(), Error> {
        Ok(())
    }

    pub fn check(&self, _mailbox: usize) -> Result<(), Error> {
        Ok(())
    }

    pub fn logout(&self) -> Result<(), Error> {
        Ok(())
    }

    #[cfg(test)]
    pub fn resident_bytes(&self) -> usize {
        self.cache.lock().unwrap().resident
    }
}

/// A message being tested against search keys, holding its body once
/// needed.
struct Candidate<'a> {
    backend: &'a Backend,
    mailbox: usize,
    seq: u32,
    body: Option<Arc<Vec<u8>>>,
}

impl Candidate<'_> {
    fn message(&self) -> &Message {
        &self.backend.mailbox(self.mailbox).messages[self.seq as usize - 1]
    }

    fn body(&mut self) -> Result<Arc<Vec<u8>>, Error> {
        if let Some(ref body) = self.body {
            return Ok(Arc::clone(body));
        }

        let body = self.backend.message_body(self.mailbox, self.seq)?;
        self.body = Some(Arc::clone(&body));
        Ok(body)
    }

    fn has_flag(&self, flag: Flag) -> bool {
        self.message().flags.contains(&flag)
    }

    fn in_set(&self, raw: &str) -> Result<bool, Error> {
        let max = self.backend.mailbox(self.mailbox).len();
        SeqSet::parse(raw, max)
            .map(|set| set.contains(self.seq))
            .ok_or_else(|| Error::BadSequenceSet(raw.to_owned()))
    }

    fn matches_all(&mut self, keys: &[SearchKey]) -> Result<bool, Error> {
        for key in keys {
            if !self.matches(key)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn matches(&mut self, key: &SearchKey) -> Result<bool, Error> {
        Ok(match *key {
            SearchKey::All => true,
            SearchKey::SeqSet(ref raw) | SearchKey::Uid(ref raw) => {
                self.in_set(raw)?
            }
            SearchKey::Answered => self.has_flag(Flag::Answered),
            SearchKey::Deleted => self.has_flag(Flag::Deleted),
            SearchKey::Draft => self.has_flag(Flag::Draft),
            SearchKey::Flagged => self.has_flag(Flag::Flagged),
            SearchKey::Seen => self.has_flag(Flag::Seen),
            SearchKey::Unanswered => !self.has_flag(Flag::Answered),
            SearchKey::Undeleted => !self.has_flag(Flag::Deleted),
            SearchKey::Undraft => !self.has_flag(Flag::Draft),
            SearchKey::Unflagged => !self.has_flag(Flag::Flagged),
            SearchKey::Unseen => !self.has_flag(Flag::Seen),
            // Nothing is ever recent
            SearchKey::New | SearchKey::Recent => false,
            SearchKey::Old => true,
            SearchKey::Keyword(_) => false,
            SearchKey::Unkeyword(_) => true,
            SearchKey::Larger(n) => self.message().size > u64::from(n),
            SearchKey::Smaller(n) => self.message().size < u64::from(n),
            SearchKey::Header(ref name, ref value) => {
                let body = self.body()?;
                let (header, _) = rfc822::split(&body);
                rfc822::header_contains(header, name, value)
            }
            SearchKey::Body(ref needle) => {
                let body = self.body()?;
                let (_, text) = rfc822::split(&body);
                rfc822::contains_ci(text, needle)
            }
            SearchKey::Text(ref needle) => {
                rfc822::contains_ci(&self.body()?, needle)
            }
            SearchKey::Not(ref inner) => !self.matches(inner)?,
            SearchKey::Or(ref a, ref b) => {
                self.matches(a)? || self.matches(b)?
            }
            SearchKey::And(ref keys) => self.matches_all(keys)?,
        })
    }
}

/// Write `data` as message `name` in `folder/sub` with the given mtime.
#[cfg(test)]
pub fn plant(
    folder: &Path,
    sub: &str,
    name: &str,
    data: &[u8],
    mtime: i64,
) -> PathBuf {
    use nix::sys::time::{TimeVal, TimeValLike};

    let path = folder.join(sub).join(name);
    fs::write(&path, data).unwrap();
    nix::sys::stat::utimes(
        &path,
        &TimeVal::seconds(mtime),
        &TimeVal::seconds(mtime),
    )
    .unwrap();
    path
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;
    use crate::maildir::layout::TMP;

    fn make_maildir(base: &Path, name: &str) -> PathBuf {
        let path = base.join(name);
        for sub in &[NEW, CUR, TMP] {
            fs::create_dir_all(path.join(sub)).unwrap();
        }
        path
    }

    fn msg(subject: &str, filler: usize) -> Vec<u8> {
        format!(
            "From: alice@example.com\r\nSubject: {}\r\n\r\n{}\r\n",
            subject,
            "x".repeat(filler)
        )
        .into_bytes()
    }

    fn set_up(cache_limit: usize) -> (TempDir, Backend) {
        crate::init_test_log();
        let root = TempDir::new().unwrap();
        let inbox = make_maildir(root.path(), "INBOX");
        plant(&inbox, CUR, "b:2,FS", &msg("second", 10), 2000);
        plant(&inbox, NEW, "a", &msg("first", 20), 1000);
        plant(&inbox, NEW, "c:2,RT", &msg("third", 30), 3000);
        plant(&inbox, NEW, ".hidden", b"nope", 500);

        make_maildir(root.path(), "Archive.2020");
        fs::create_dir_all(root.path().join("partial").join(NEW)).unwrap();
        fs::write(root.path().join("oldmail-x-993-me-INBOX"), b"").unwrap();

        let backend = Backend::load(
            root.path(),
            "me",
            SecStr::from("hunter2"),
            cache_limit,
        )
        .unwrap();
        (root, backend)
    }

    #[test]
    fn scan_and_order() {
        let (_root, backend) = set_up(1_000_000);
        assert_eq!(
            vec!["Archive.2020", "INBOX"],
            backend
                .list_mailboxes()
                .iter()
                .map(|m| &m.name[..])
                .collect::<Vec<_>>()
        );

        let inbox = backend.get_mailbox("INBOX").unwrap();
        assert_matches!(Err(Error::NoSuchMailbox), backend.get_mailbox("x"));
        assert_matches!(
            Err(Error::NoSuchMailbox),
            backend.get_mailbox("partial")
        );

        let mb = backend.mailbox(inbox);
        assert_eq!(3, mb.len());
        assert_eq!(
            vec![1, 2, 3],
            mb.messages.iter().map(|m| m.uid).collect::<Vec<_>>()
        );
        assert_eq!(vec![Flag::Seen], mb.messages[0].flags);
        assert_eq!(vec![Flag::Flagged, Flag::Seen], mb.messages[1].flags);
        assert_eq!(
            vec![Flag::Answered, Flag::Deleted, Flag::Seen],
            mb.messages[2].flags
        );
        assert_eq!(1000, mb.messages[0].internal_date.timestamp());
        assert_eq!(
            msg("first", 20),
            *backend.message_body(inbox, 1).unwrap()
        );
        assert_eq!(
            vec![2, 3],
            backend.list_messages(inbox, &SeqSet::parse("2:*", 3).unwrap())
        );

        assert_eq!(
            Status {
                messages: 3,
                uid_next: 4,
                uid_validity: 1,
                recent: 0,
                unseen: 0,
                flags: vec![
                    Flag::Answered,
                    Flag::Deleted,
                    Flag::Flagged,
                    Flag::Seen
                ],
                permanent_flags: vec!["\\*"],
            },
            backend.status(inbox)
        );
    }

    #[test]
    fn login() {
        let (_root, backend) = set_up(1_000_000);
        assert!(backend.login("me", "hunter2").is_ok());
        assert_matches!(Err(Error::AuthFailed), backend.login("me", "hunter"));
        assert_matches!(
            Err(Error::AuthFailed),
            backend.login("you", "hunter2")
        );
    }

    #[test]
    fn mutation_refused() {
        let (_root, backend) = set_up(1_000_000);
        let inbox = backend.get_mailbox("INBOX").unwrap();
        assert_matches!(Err(Error::ReadOnly), backend.create_message());
        assert_matches!(Err(Error::ReadOnly), backend.copy_messages(inbox));
        assert_matches!(Err(Error::ReadOnly), backend.store(inbox));
        assert_matches!(Err(Error::ReadOnly), backend.expunge(inbox));
        assert_matches!(Err(Error::ReadOnly), backend.delete_mailbox("INBOX"));
        assert_matches!(Err(Error::ReadOnly), backend.rename_mailbox());
        assert_eq!(
            "cannot execute action, this is a read-only IMAP server",
            Error::ReadOnly.to_string()
        );
        assert!(backend.create_mailbox("new").is_ok());
        assert!(backend.set_subscribed("INBOX", true).is_ok());
        assert!(backend.check(inbox).is_ok());
        assert_eq!(3, backend.mailbox(inbox).len());
        assert!(backend.get_mailbox("new").is_err());
    }

    #[test]
    fn cache_evicts_everything_when_full() {
        let (_root, backend) = set_up(130);
        let inbox = backend.get_mailbox("INBOX").unwrap();
        let sizes = backend
            .mailbox(inbox)
            .messages
            .iter()
            .map(|m| m.size as usize)
            .collect::<Vec<_>>();
        let largest = *sizes.iter().max().unwrap();

        for &seq in &[1, 2, 3, 1, 3, 2, 2, 1] {
            backend.message_body(inbox, seq).unwrap();
            assert!(backend.resident_bytes() <= 130 + largest);
        }

        backend.message_body(inbox, 1).unwrap();
        let before = backend.resident_bytes();
        backend.message_body(inbox, 1).unwrap();
        assert_eq!(before, backend.resident_bytes());

        let resident = backend
            .mailbox(inbox)
            .messages
            .iter()
            .filter(|m| m.body.lock().unwrap().is_some())
            .map(|m| m.size as usize)
            .sum::<usize>();
        assert_eq!(resident, backend.resident_bytes());
    }

    #[test]
    fn search() {
        let (_root, backend) = set_up(1_000_000);
        let inbox = backend.get_mailbox("INBOX").unwrap();
        let search = |keys: Vec<SearchKey>| {
            backend.search_messages(inbox, &keys).unwrap()
        };

        assert_eq!(vec![1, 2, 3], search(vec![SearchKey::All]));
        assert_eq!(Vec::<u32>::new(), search(vec![SearchKey::Unseen]));
        assert_eq!(vec![2], search(vec![SearchKey::Flagged]));
        assert_eq!(
            vec![1, 3],
            search(vec![SearchKey::Or(
                Box::new(SearchKey::SeqSet("1".to_owned())),
                Box::new(SearchKey::Uid("3:*".to_owned())),
            )])
        );
        assert_eq!(
            vec![2],
            search(vec![SearchKey::Header(
                "Subject".to_owned(),
                "SEC".to_owned()
            )])
        );
        assert_eq!(
            vec![1, 2],
            search(vec![SearchKey::Not(Box::new(SearchKey::Body(
                "x".repeat(25)
            )))])
        );
        assert_eq!(
            vec![3],
            search(vec![SearchKey::Larger(
                backend.mailbox(inbox).messages[0].size as u32
            )])
        );
        assert_matches!(
            Err(Error::BadSequenceSet(_)),
            backend.search_messages(inbox, &[SearchKey::SeqSet("0".to_owned())])
        );
    }
}
