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
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Which side of a reconciliation carried an inconsistent UID validity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataSource {
    Retrieved,
    Stored,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DataSource::Retrieved => write!(f, "retrieved"),
            DataSource::Stored => write!(f, "stored"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("password not set")]
    CredentialsMissing,
    #[error("bad username or password")]
    AuthFailed,
    #[error("network error: {0}")]
    Network(String),
    #[error("inconsistent UID validity on {0} data")]
    UidValidityDrift(DataSource),
    #[error("mailbox {0} does not report a UID validity")]
    MissingUidValidity(String),
    #[error("malformed oldmail line {line} in {}: {text:?}", .path.display())]
    OldmailParse {
        path: PathBuf,
        line: usize,
        text: String,
    },
    #[error("{} is not a valid maildir", .0.display())]
    MaildirInvalid(PathBuf),
    #[error("fetch response lacks {0}")]
    FetchItemMissing(&'static str),
    #[error("fetch response carries {0} more than once")]
    FetchItemDuplicate(&'static str),
    #[error("fetch response section {0:?} is not an RFC822 section")]
    FetchItemUnexpected(String),
    #[error("could not deliver to {}: {source}", .path.display())]
    DeliveryIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not write {}: {source}", .path.display())]
    PersistIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not acquire lock on {} within {timeout:?}", .path.display())]
    LockTimeout { path: PathBuf, timeout: Duration },
    #[error("interrupted")]
    Interrupted,
    #[error(
        "there were {retrieve}/{deliver}/{persist} errors while: \
         retrieving/delivering/remembering mail"
    )]
    PipelineErrors {
        retrieve: usize,
        deliver: usize,
        persist: usize,
    },
    #[error("cannot execute action, this is a read-only IMAP server")]
    ReadOnly,
    #[error("no such mailbox")]
    NoSuchMailbox,
    #[error("no mailbox selected")]
    NotSelected,
    #[error("not logged in")]
    NotAuthenticated,
    #[error("invalid sequence set {0:?}")]
    BadSequenceSet(String),
    #[error("invalid range {start}:{end} (must lie within {min}:{max})")]
    InvalidRange {
        start: i64,
        end: i64,
        min: i64,
        max: i64,
    },
    #[error("unparsable range {0:?}")]
    BadRange(String),
    #[error("host name {0:?} contains a space")]
    BadHostname(String),
    #[error("unsafe folder name {0:?}")]
    UnsafeName(String),
    #[error("a worker thread panicked")]
    WorkerPanicked,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Nix(#[from] nix::Error),
    #[error(transparent)]
    Ssl(#[from] openssl::error::ErrorStack),
    #[error("IMAP error: {0}")]
    Imap(#[from] imap::error::Error),
    #[error(transparent)]
    Config(#[from] toml::de::Error),
}
