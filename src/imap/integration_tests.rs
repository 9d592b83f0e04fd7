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

//! End-to-end tests running the real server on a loopback port and talking to
//! it with the backup client or raw sockets.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use secstr::SecStr;
use tempfile::TempDir;

use super::backend::{plant, Backend};
use super::server::serve;
use crate::backup::download::Backup;
use crate::maildir::layout::{UniqueNamer, CUR, NEW, TMP};
use crate::maildir::oldmail::{self, OldmailEntry};
use crate::remote::fetch_item::Email;
use crate::remote::session::{ImapConfig, Remote, Session, Uid};
use crate::support::interrupt::Interrupter;
use crate::support::ranges::Range;

const FIRST: &[u8] = b"From: alice@example.com\r\n\
                       Subject: First\r\n\
                       \r\n\
                       Hello there.\r\n";
const SECOND: &[u8] = b"From: bob@example.com\r\n\
                        Subject: Second\r\n\
                        \r\n\
                        General Kenobi.\r\n";

const FIRST_MTIME: i64 = 1_500_000_000;
const SECOND_MTIME: i64 = 1_500_000_060;

pub struct TestServer {
    _root: TempDir,
    pub port: u16,
    stop: Arc<Interrupter>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop.request_stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn start_server() -> TestServer {
    start_server_with(&[])
}

/// Serve INBOX with two messages, plus each of `extra` holding a copy of the
/// first.
pub fn start_server_with(extra: &[&str]) -> TestServer {
    crate::init_test_log();

    let root = TempDir::new().unwrap();
    let inbox = root.path().join("INBOX");
    for sub in &[NEW, CUR, TMP] {
        fs::create_dir_all(inbox.join(sub)).unwrap();
    }
    plant(&inbox, CUR, "second:2,S", SECOND, SECOND_MTIME);
    plant(&inbox, NEW, "first", FIRST, FIRST_MTIME);

    for name in extra {
        let folder = root.path().join(name);
        for sub in &[NEW, CUR, TMP] {
            fs::create_dir_all(folder.join(sub)).unwrap();
        }
        plant(&folder, NEW, "first", FIRST, FIRST_MTIME);
    }

    let backend =
        Backend::load(root.path(), "me", SecStr::from("pw"), 1_000_000)
            .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let stop = Interrupter::new(vec![]);

    let thread = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            serve(listener, Arc::new(backend), &stop).unwrap()
        })
    };

    TestServer {
        _root: root,
        port,
        stop,
        thread: Some(thread),
    }
}

pub fn client_config(port: u16) -> ImapConfig {
    ImapConfig {
        server: "127.0.0.1".to_owned(),
        port,
        user: "me".to_owned(),
        password: SecStr::from("pw"),
        insecure: true,
    }
}

#[test]
fn session_round_trip() {
    let server = start_server();
    let mut session = Session::authenticate(&client_config(server.port))
        .unwrap();

    assert_eq!(vec!["INBOX".to_owned()], session.list().unwrap());

    let status = session.select("INBOX").unwrap();
    assert_eq!(1, status.uid_validity);
    assert_eq!(2, status.message_count);
    assert_eq!(
        vec![Uid { validity: 1, uid: 1 }, Uid { validity: 1, uid: 2 }],
        session.fetch_uids().unwrap()
    );

    let (sender, receiver) = crossbeam::channel::unbounded();
    session.fetch_bodies(Range::new(1, 2), &sender).unwrap();
    drop(sender);
    let responses = receiver.iter().collect::<Vec<_>>();
    assert_eq!(1, responses.len());

    let email = Email::from_items(responses[0].clone()).unwrap();
    assert_eq!(1, email.uid);
    assert_eq!(FIRST_MTIME, email.timestamp);
    assert_eq!(FIRST.to_vec(), email.body);

    session.logout().unwrap();
}

#[test]
fn wrong_password_is_auth_failure() {
    let server = start_server();
    let mut cfg = client_config(server.port);
    cfg.password = SecStr::from("nope");
    assert_matches!(
        Err(crate::support::error::Error::AuthFailed),
        Session::authenticate(&cfg)
    );
}

/// Send `command` and collect response lines through the tagged one.
fn exchange(
    reader: &mut BufReader<TcpStream>,
    writer: &mut TcpStream,
    tag: &str,
    command: &str,
) -> Vec<String> {
    writer
        .write_all(format!("{} {}\r\n", tag, command).as_bytes())
        .unwrap();

    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(!line.is_empty(), "EOF after {:?}", lines);
        let done = line.starts_with(&format!("{} ", tag));
        lines.push(line.trim_end().to_owned());
        if done {
            return lines;
        }
    }
}

#[test]
fn raw_protocol() {
    let server = start_server();
    let mut writer = TcpStream::connect(("127.0.0.1", server.port)).unwrap();
    writer
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    let mut reader = BufReader::new(writer.try_clone().unwrap());

    let mut greeting = String::new();
    reader.read_line(&mut greeting).unwrap();
    assert!(greeting.starts_with("* OK "));

    assert_eq!(
        vec!["a OK LOGIN completed"],
        exchange(&mut reader, &mut writer, "a", "LOGIN me pw")
    );
    assert_eq!(
        vec!["* LIST () \"/\" INBOX", "b OK LIST completed"],
        exchange(&mut reader, &mut writer, "b", "LIST \"\" \"*\"")
    );
    assert_eq!(
        Some(&"c OK [READ-ONLY] SELECT completed".to_owned()),
        exchange(&mut reader, &mut writer, "c", "SELECT INBOX").last()
    );
    assert_eq!(
        vec!["d NO cannot execute action, this is a read-only IMAP server"],
        exchange(&mut reader, &mut writer, "d", "STORE 1 +FLAGS (\\Deleted)")
    );
    // Refused without a continuation, so the literal is never sent
    assert_eq!(
        vec!["e NO cannot execute action, this is a read-only IMAP server"],
        exchange(&mut reader, &mut writer, "e", "APPEND INBOX {5}")
    );
    assert_eq!(
        vec!["f OK NOOP completed"],
        exchange(&mut reader, &mut writer, "f", "NOOP")
    );
    // Synchronising literal in an ordinary command
    writer.write_all(b"g LOGIN {2}\r\n").unwrap();
    let mut cont = String::new();
    reader.read_line(&mut cont).unwrap();
    assert_eq!("+ go\r\n", cont);
    writer.write_all(b"me pw\r\n").unwrap();
    let mut done = String::new();
    reader.read_line(&mut done).unwrap();
    assert_eq!("g OK LOGIN completed\r\n", done);
    assert_eq!(
        vec!["* BYE Logging out", "z OK LOGOUT completed"],
        exchange(&mut reader, &mut writer, "z", "LOGOUT")
    );
}

fn oldmail_of(base: &Path, port: u16) -> Vec<u8> {
    fs::read(oldmail::path(base, "127.0.0.1", port, "me", "INBOX")).unwrap()
}

#[test]
fn backup_end_to_end() {
    let server = start_server();
    let dest = TempDir::new().unwrap();
    let cfg = client_config(server.port);
    let interrupter = Interrupter::new(vec![]);
    let namer = UniqueNamer::with_hostname("test.host").unwrap();
    let backup = Backup {
        cfg: &cfg,
        base: dest.path(),
        threads: 2,
        lock_timeout: Duration::from_secs(5),
        window: &[],
        interrupter: &interrupter,
        namer: &namer,
    };

    backup.run(&["_ALL_".to_owned()]).unwrap();

    let new_dir = dest.path().join("INBOX").join(NEW);
    let mut delivered = fs::read_dir(&new_dir)
        .unwrap()
        .map(|e| fs::read(e.unwrap().path()).unwrap())
        .collect::<Vec<_>>();
    delivered.sort();
    assert_eq!(vec![FIRST.to_vec(), SECOND.to_vec()], delivered);

    let state = oldmail_of(dest.path(), server.port);
    assert_eq!(
        oldmail::encode(&[
            OldmailEntry {
                uid_validity: 1,
                uid: 1,
                timestamp: FIRST_MTIME,
            },
            OldmailEntry {
                uid_validity: 1,
                uid: 2,
                timestamp: SECOND_MTIME,
            },
        ]),
        state
    );

    // Nothing new the second time around
    backup.run(&["_ALL_".to_owned()]).unwrap();
    assert_eq!(state, oldmail_of(dest.path(), server.port));
    assert_eq!(2, fs::read_dir(&new_dir).unwrap().count());
}

#[test]
fn captured_stop_request_ends_idle_server() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let root = TempDir::new().unwrap();
    let backend =
        Backend::load(root.path(), "me", SecStr::from("pw"), 1_000_000)
            .unwrap();
    let stop = Interrupter::new(vec![]);
    let registration = stop.register().unwrap();

    let (done_send, done_recv) = crossbeam::channel::bounded(1);
    {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let _ = done_send.send(serve(listener, Arc::new(backend), &stop));
        });
    }

    thread::sleep(Duration::from_millis(50));
    stop.request_stop();
    assert_matches!(
        Ok(Ok(())),
        done_recv.recv_timeout(Duration::from_secs(5))
    );
    assert!(stop.interrupted());
    registration.deregister();
}
