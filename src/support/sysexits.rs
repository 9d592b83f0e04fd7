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

//! Exit codes from `sysexits.h`, and the mapping from crate errors onto them.

use super::error::Error;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Sysexit(pub i32);

pub const EX_USAGE: Sysexit = Sysexit(64);
pub const EX_DATAERR: Sysexit = Sysexit(65);
pub const EX_UNAVAILABLE: Sysexit = Sysexit(69);
pub const EX_SOFTWARE: Sysexit = Sysexit(70);
pub const EX_OSERR: Sysexit = Sysexit(71);
pub const EX_CANTCREAT: Sysexit = Sysexit(73);
pub const EX_IOERR: Sysexit = Sysexit(74);
pub const EX_TEMPFAIL: Sysexit = Sysexit(75);
pub const EX_PROTOCOL: Sysexit = Sysexit(76);
pub const EX_NOPERM: Sysexit = Sysexit(77);
pub const EX_CONFIG: Sysexit = Sysexit(78);

impl Sysexit {
    pub fn exit(self) -> ! {
        std::process::exit(self.0)
    }

    /// Choose the exit code which best describes `err`.
    pub fn for_error(err: &Error) -> Self {
        match *err {
            Error::CredentialsMissing | Error::AuthFailed => EX_NOPERM,
            Error::Network(..) | Error::Ssl(..) => EX_UNAVAILABLE,
            Error::Imap(..)
            | Error::MissingUidValidity(..)
            | Error::FetchItemMissing(..)
            | Error::FetchItemDuplicate(..)
            | Error::FetchItemUnexpected(..) => EX_PROTOCOL,
            Error::UidValidityDrift(..) | Error::OldmailParse { .. } => {
                EX_DATAERR
            }
            Error::MaildirInvalid(..) | Error::UnsafeName(..) => EX_CANTCREAT,
            Error::LockTimeout { .. } | Error::Interrupted => EX_TEMPFAIL,
            Error::DeliveryIo { .. }
            | Error::PersistIo { .. }
            | Error::PipelineErrors { .. }
            | Error::Io(..) => EX_IOERR,
            Error::Nix(..) | Error::BadHostname(..) => EX_OSERR,
            Error::Config(..) => EX_CONFIG,
            Error::InvalidRange { .. } | Error::BadRange(..) => EX_USAGE,
            Error::ReadOnly
            | Error::NoSuchMailbox
            | Error::NotSelected
            | Error::NotAuthenticated
            | Error::BadSequenceSet(..)
            | Error::WorkerPanicked => EX_SOFTWARE,
        }
    }
}
