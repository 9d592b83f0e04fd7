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

//! A client session against the remote IMAP server.
//!
//! This wraps the `imap` crate's blocking client over either a TLS or a
//! plain TCP stream and exposes only what a backup needs. Nothing here ever
//! changes server state: folders are opened with `EXAMINE`, and bodies are
//! fetched with `BODY.PEEK[]`.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::str;

use crossbeam::channel::Sender;
use log::{debug, info, warn};
use openssl::ssl::{HandshakeError, SslConnector, SslMethod, SslStream};
use secstr::SecStr;

use super::fetch_item::FetchItem;
use crate::support::error::Error;
use crate::support::ranges::Range;

/// Upper bound on the number of messages requested by one FETCH command.
pub const FETCH_BATCH: i64 = 64;

const BODY_QUERY: &str = "(UID INTERNALDATE BODY.PEEK[])";
const UID_QUERY: &str = "(UID)";

/// Connection parameters for one account.
#[derive(Clone, Debug)]
pub struct ImapConfig {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: SecStr,
    /// Skip TLS entirely. Only sensible against a loopback server.
    pub insecure: bool,
}

impl ImapConfig {
    /// The prefix for log messages concerning `folder` of this account.
    pub fn log_prefix(&self, folder: &str) -> String {
        format!("{}@{}:{}/{}", self.user, self.server, self.port, folder)
    }
}

/// A remote message identifier, qualified by its mailbox's UID validity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Uid {
    pub validity: u32,
    pub uid: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailboxStatus {
    pub name: String,
    pub uid_validity: u32,
    pub message_count: u32,
}

/// The part of a session the download pipeline drives.
pub trait Remote: Send {
    /// Fetch UID, INTERNALDATE, and full content of every message in
    /// `range` of the selected mailbox, sending each response's items to
    /// `sink`.
    ///
    /// If `sink` is disconnected, stops after the FETCH in flight and
    /// returns successfully.
    fn fetch_bodies(
        &mut self,
        range: Range,
        sink: &Sender<Vec<FetchItem>>,
    ) -> Result<(), Error>;
}

enum Transport {
    Plain(TcpStream),
    Tls(SslStream<TcpStream>),
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Transport::Plain(..) => write!(f, "Transport::Plain"),
            Transport::Tls(..) => write!(f, "Transport::Tls"),
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match *self {
            Transport::Plain(ref mut s) => s.read(buf),
            Transport::Tls(ref mut s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self {
            Transport::Plain(ref mut s) => s.write(buf),
            Transport::Tls(ref mut s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match *self {
            Transport::Plain(ref mut s) => s.flush(),
            Transport::Tls(ref mut s) => s.flush(),
        }
    }
}

fn network(e: impl fmt::Display) -> Error {
    Error::Network(e.to_string())
}

/// Separate transport failures from protocol-level errors.
fn classify(e: imap::error::Error) -> Error {
    match e {
        imap::error::Error::Io(e) => network(e),
        imap::error::Error::ConnectionLost => {
            Error::Network("connection lost".to_owned())
        }
        e => Error::Imap(e),
    }
}

/// An authenticated session.
pub struct Session {
    inner: imap::Session<Transport>,
    /// A second handle on the socket, for `terminate`.
    socket: TcpStream,
    selected: Option<MailboxStatus>,
    log_prefix: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Session({})", self.log_prefix)
    }
}

impl Session {
    /// Dial the server and log in.
    ///
    /// An empty password fails with `CredentialsMissing` without touching
    /// the network, and a rejected login fails with `AuthFailed`.
    pub fn authenticate(cfg: &ImapConfig) -> Result<Self, Error> {
        let password = str::from_utf8(cfg.password.unsecure())
            .map_err(|_| Error::AuthFailed)?;
        if password.is_empty() {
            return Err(Error::CredentialsMissing);
        }

        let log_prefix = format!("{}@{}:{}", cfg.user, cfg.server, cfg.port);
        debug!("{} Connecting", log_prefix);

        let tcp = TcpStream::connect((cfg.server.as_str(), cfg.port))
            .map_err(network)?;
        let socket = tcp.try_clone()?;

        let transport = if cfg.insecure {
            warn!("{} Using an unencrypted connection", log_prefix);
            Transport::Plain(tcp)
        } else {
            let connector = SslConnector::builder(SslMethod::tls())?.build();
            Transport::Tls(connector.connect(&cfg.server, tcp).map_err(
                |e| match e {
                    HandshakeError::SetupFailure(es) => Error::Ssl(es),
                    HandshakeError::Failure(f) => network(f.into_error()),
                    HandshakeError::WouldBlock(_) => {
                        network("TLS handshake interrupted")
                    }
                },
            )?)
        };

        let mut client = imap::Client::new(transport);
        client.read_greeting().map_err(classify)?;

        let inner =
            client
                .login(&cfg.user, password)
                .map_err(|(e, _)| match e {
                    imap::error::Error::No(_) => Error::AuthFailed,
                    e => classify(e),
                })?;

        info!("{} Logged in", log_prefix);
        Ok(Session {
            inner,
            socket,
            selected: None,
            log_prefix,
        })
    }

    /// Names of all selectable folders, in server order.
    pub fn list(&mut self) -> Result<Vec<String>, Error> {
        let names = self.inner.list(Some(""), Some("*")).map_err(classify)?;
        Ok(names
            .iter()
            .filter(|n| {
                !n.attributes().iter().any(|a| {
                    matches!(*a, imap::types::NameAttribute::NoSelect)
                })
            })
            .map(|n| n.name().to_owned())
            .collect())
    }

    /// Open `folder` read-only.
    pub fn select(&mut self, folder: &str) -> Result<MailboxStatus, Error> {
        let mailbox = self.inner.examine(folder).map_err(classify)?;
        let status = MailboxStatus {
            name: folder.to_owned(),
            uid_validity: mailbox
                .uid_validity
                .ok_or_else(|| Error::MissingUidValidity(folder.to_owned()))?,
            message_count: mailbox.exists,
        };

        debug!(
            "{}/{} UIDVALIDITY {}, {} messages",
            self.log_prefix, folder, status.uid_validity, status.message_count
        );
        self.selected = Some(status.clone());
        Ok(status)
    }

    /// The UIDs of every message in the selected folder, in sequence number
    /// order.
    pub fn fetch_uids(&mut self) -> Result<Vec<Uid>, Error> {
        let (validity, count) = match self.selected {
            Some(ref s) => (s.uid_validity, s.message_count),
            None => return Err(Error::NotSelected),
        };
        if 0 == count {
            return Ok(vec![]);
        }

        let fetches = self
            .inner
            .fetch(format!("1:{}", count), UID_QUERY)
            .map_err(classify)?;
        place_uids(validity, count, fetches.iter().map(|f| (f.message, f.uid)))
    }

    /// Politely end the session.
    pub fn logout(mut self) -> Result<(), Error> {
        self.inner.logout().map_err(classify)?;
        debug!("{} Logged out", self.log_prefix);
        Ok(())
    }

    /// Drop the connection without waiting for the server.
    pub fn terminate(self) {
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            debug!("{} Error closing socket: {}", self.log_prefix, e);
        }
        debug!("{} Connection terminated", self.log_prefix);
    }
}

/// Order `(sequence number, UID)` pairs from FETCH responses by sequence
/// number.
///
/// Responses may arrive in any order, and ones without a UID or outside
/// `1..=count` are ignored. Every message must end up with exactly one UID.
fn place_uids(
    validity: u32,
    count: u32,
    responses: impl Iterator<Item = (u32, Option<u32>)>,
) -> Result<Vec<Uid>, Error> {
    let mut slots = vec![None; count as usize];
    for (seq, uid) in responses {
        let uid = match uid {
            Some(uid) => uid,
            None => continue,
        };
        if 0 == seq || seq > count {
            debug!("Ignoring FETCH for message {} of {}", seq, count);
            continue;
        }

        let slot = &mut slots[seq as usize - 1];
        match *slot {
            Some(existing) if existing != uid => {
                return Err(Error::FetchItemDuplicate("UID"));
            }
            _ => *slot = Some(uid),
        }
    }

    slots
        .into_iter()
        .map(|uid| {
            uid.map(|uid| Uid { validity, uid })
                .ok_or(Error::FetchItemMissing("UID"))
        })
        .collect()
}

impl Remote for Session {
    fn fetch_bodies(
        &mut self,
        range: Range,
        sink: &Sender<Vec<FetchItem>>,
    ) -> Result<(), Error> {
        let mut start = range.start;
        while start < range.end {
            let batch = Range::new(start, range.end.min(start + FETCH_BATCH));
            start = batch.end;

            let fetches = self
                .inner
                .fetch(batch.to_seq_set(), BODY_QUERY)
                .map_err(classify)?;
            for fetch in fetches.iter() {
                let mut items = Vec::with_capacity(4);
                if let Some(uid) = fetch.uid {
                    items.push(FetchItem::Uid(uid));
                }
                if let Some(date) = fetch.internal_date() {
                    items.push(FetchItem::Timestamp(date));
                }
                if let Some(body) = fetch.body() {
                    items.push(FetchItem::HeaderName("RFC822".to_owned()));
                    items.push(FetchItem::Body(body.to_vec()));
                }

                if sink.send(items).is_err() {
                    debug!("{} Fetch consumer went away", self.log_prefix);
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_password_rejected_before_dialling() {
        let cfg = ImapConfig {
            // Nothing listens here; dialling would fail differently
            server: "127.0.0.1".to_owned(),
            port: 1,
            user: "me".to_owned(),
            password: SecStr::from(""),
            insecure: true,
        };
        assert_matches!(
            Err(Error::CredentialsMissing),
            Session::authenticate(&cfg)
        );
    }

    #[test]
    fn dial_failure_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let cfg = ImapConfig {
            server: "127.0.0.1".to_owned(),
            port,
            user: "me".to_owned(),
            password: SecStr::from("hunter2"),
            insecure: true,
        };
        assert_matches!(Err(Error::Network(_)), Session::authenticate(&cfg));
    }

    #[test]
    fn uids_are_placed_by_sequence_number() {
        let uid = |uid| Uid { validity: 7, uid };

        // Reordered, with an unsolicited flag update and a stray message
        assert_eq!(
            vec![uid(10), uid(11), uid(15)],
            place_uids(
                7,
                3,
                vec![(3, Some(15)), (2, None), (1, Some(10)), (9, Some(99))]
                    .into_iter()
                    .chain(vec![(2, Some(11)), (1, Some(10))])
            )
            .unwrap()
        );

        assert_matches!(
            Err(Error::FetchItemMissing("UID")),
            place_uids(7, 2, vec![(2, Some(11))].into_iter())
        );
        assert_matches!(
            Err(Error::FetchItemDuplicate("UID")),
            place_uids(7, 1, vec![(1, Some(1)), (1, Some(2))].into_iter())
        );
    }

    #[test]
    fn log_prefix_names_folder() {
        let cfg = ImapConfig {
            server: "imap.example.com".to_owned(),
            port: 993,
            user: "me".to_owned(),
            password: SecStr::from("x"),
            insecure: false,
        };
        assert_eq!("me@imap.example.com:993/INBOX", cfg.log_prefix("INBOX"));
    }
}
