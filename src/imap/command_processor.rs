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

//! Executes parsed commands against the backend and renders the responses.
//!
//! The processor tracks the session state (authenticated, selected mailbox)
//! but knows nothing about the connection itself; it consumes complete
//! command lines and produces complete response buffers.

use std::sync::Arc;

use log::{info, warn};
use regex::Regex;

use super::backend::Backend;
use super::lex::LexWriter;
use super::rfc822;
use super::seq_set::SeqSet;
use super::syntax::{
    parse_command_line, Command, FetchAtt, ParseFailure, Section, StatusAtt,
};
use crate::support::error::Error;

pub static CAPABILITIES: &[&str] = &["IMAP4rev1", "UNSELECT"];

static TAGLINE: &str = concat!(
    env!("CARGO_PKG_NAME"),
    " ",
    env!("CARGO_PKG_VERSION"),
    " read-only server ready"
);

/// Hierarchy delimiter reported by LIST. Folder names never contain it.
const DELIMITER: &str = "/";

pub struct CommandProcessor {
    log_prefix: String,
    backend: Arc<Backend>,
    logged_in: bool,
    logged_out: bool,
    selected: Option<usize>,
}

impl CommandProcessor {
    pub fn new(log_prefix: String, backend: Arc<Backend>) -> Self {
        CommandProcessor {
            log_prefix,
            backend,
            logged_in: false,
            logged_out: false,
            selected: None,
        }
    }

    pub fn greet(&self) -> Vec<u8> {
        format!("* OK [CAPABILITY {}] {}\r\n", CAPABILITIES.join(" "), TAGLINE)
            .into_bytes()
    }

    pub fn logged_out(&self) -> bool {
        self.logged_out
    }

    /// Handle one complete command line, without its final line ending.
    pub fn handle_line(&mut self, line: &[u8]) -> Vec<u8> {
        let cmdline = match parse_command_line(line) {
            Ok(cmdline) => cmdline,
            Err(ParseFailure::Tagged(tag)) => {
                return format!("{} BAD Unrecognised command syntax\r\n", tag)
                    .into_bytes();
            }
            Err(ParseFailure::Untagged) => {
                return b"* BAD That doesn't look like an IMAP command\r\n"
                    .to_vec();
            }
        };

        let mut w = LexWriter::new();
        match self.execute(cmdline.cmd, &mut w) {
            Ok(quip) => {
                w.verbatim(&format!("{} OK {}\r\n", cmdline.tag, quip));
                w.into_inner()
            }
            Err(e) => {
                let cond = match e {
                    Error::BadSequenceSet(..) => "BAD",
                    _ => "NO",
                };
                warn!("{} {} {}: {}", self.log_prefix, cmdline.tag, cond, e);
                format!("{} {} {}\r\n", cmdline.tag, cond, e).into_bytes()
            }
        }
    }

    /// The tagged response to an APPEND which is refused before its literal
    /// is read.
    pub fn reject_append(&self, tag: &str) -> Vec<u8> {
        let e = self
            .require_auth()
            .and_then(|()| self.backend.create_message())
            .err()
            .unwrap_or(Error::ReadOnly);
        format!("{} NO {}\r\n", tag, e).into_bytes()
    }

    fn require_auth(&self) -> Result<(), Error> {
        if self.logged_in {
            Ok(())
        } else {
            Err(Error::NotAuthenticated)
        }
    }

    fn require_selected(&self) -> Result<usize, Error> {
        self.require_auth()?;
        self.selected.ok_or(Error::NotSelected)
    }

    fn execute(
        &mut self,
        cmd: Command,
        w: &mut LexWriter,
    ) -> Result<String, Error> {
        match cmd {
            Command::Capability => {
                w.verbatim(&format!(
                    "* CAPABILITY {}\r\n",
                    CAPABILITIES.join(" ")
                ));
                Ok("CAPABILITY completed".to_owned())
            }
            Command::Noop => Ok("NOOP completed".to_owned()),
            Command::Logout => {
                self.backend.logout()?;
                self.logged_out = true;
                self.selected = None;
                w.verbatim("* BYE Logging out\r\n");
                Ok("LOGOUT completed".to_owned())
            }
            Command::Login { user, password } => {
                self.backend.login(&user, &password)?;
                info!("{} Login successful as {}", self.log_prefix, user);
                self.logged_in = true;
                Ok("LOGIN completed".to_owned())
            }
            Command::List { reference, pattern } => {
                self.require_auth()?;
                self.list("LIST", &reference, &pattern, w)?;
                Ok("LIST completed".to_owned())
            }
            Command::Lsub { reference, pattern } => {
                self.require_auth()?;
                // Everything counts as subscribed
                self.list("LSUB", &reference, &pattern, w)?;
                Ok("LSUB completed".to_owned())
            }
            Command::Status { mailbox, atts } => {
                self.require_auth()?;
                self.status(&mailbox, &atts, w)?;
                Ok("STATUS completed".to_owned())
            }
            Command::Select(mailbox) => self.select(&mailbox, "SELECT", w),
            Command::Examine(mailbox) => self.select(&mailbox, "EXAMINE", w),
            Command::Create(mailbox) => {
                self.require_auth()?;
                self.backend.create_mailbox(&mailbox)?;
                Ok("CREATE completed".to_owned())
            }
            Command::Subscribe(mailbox) => {
                self.require_auth()?;
                self.backend.set_subscribed(&mailbox, true)?;
                Ok("SUBSCRIBE completed".to_owned())
            }
            Command::Unsubscribe(mailbox) => {
                self.require_auth()?;
                self.backend.set_subscribed(&mailbox, false)?;
                Ok("UNSUBSCRIBE completed".to_owned())
            }
            Command::Close | Command::Unselect => {
                self.require_selected()?;
                self.selected = None;
                Ok("Mailbox closed".to_owned())
            }
            Command::Check => {
                let mailbox = self.require_selected()?;
                self.backend.check(mailbox)?;
                Ok("CHECK completed".to_owned())
            }
            Command::Fetch { uid, seqset, atts } => {
                let mailbox = self.require_selected()?;
                self.fetch(mailbox, uid, &seqset, atts, w)?;
                Ok("FETCH completed".to_owned())
            }
            Command::Search { keys, .. } => {
                let mailbox = self.require_selected()?;
                let hits = self.backend.search_messages(mailbox, &keys)?;
                w.verbatim("* SEARCH");
                for hit in hits {
                    w.verbatim(" ");
                    w.num(hit);
                }
                w.verbatim("\r\n");
                Ok("SEARCH completed".to_owned())
            }
            Command::Append => {
                self.require_auth()?;
                self.backend.create_message()?;
                Ok("APPEND completed".to_owned())
            }
            Command::Copy => {
                let mailbox = self.require_selected()?;
                self.backend.copy_messages(mailbox)?;
                Ok("COPY completed".to_owned())
            }
            Command::Store => {
                let mailbox = self.require_selected()?;
                self.backend.store(mailbox)?;
                Ok("STORE completed".to_owned())
            }
            Command::Expunge => {
                let mailbox = self.require_selected()?;
                self.backend.expunge(mailbox)?;
                Ok("EXPUNGE completed".to_owned())
            }
            Command::Delete(mailbox) => {
                self.require_auth()?;
                self.backend.delete_mailbox(&mailbox)?;
                Ok("DELETE completed".to_owned())
            }
            Command::Rename => {
                self.require_auth()?;
                self.backend.rename_mailbox()?;
                Ok("RENAME completed".to_owned())
            }
        }
    }

    fn list(
        &self,
        verb: &str,
        reference: &str,
        pattern: &str,
        w: &mut LexWriter,
    ) -> Result<(), Error> {
        if pattern.is_empty() {
            // Request for the delimiter
            w.verbatim(&format!(
                "* {} (\\Noselect) \"{}\" \"\"\r\n",
                verb, DELIMITER
            ));
            return Ok(());
        }

        let matcher =
            match list_matcher(&format!("{}{}", reference, pattern)) {
                Some(matcher) => matcher,
                None => return Ok(()),
            };
        for mailbox in self.backend.list_mailboxes() {
            if matcher.is_match(&mailbox.name) {
                w.verbatim(&format!("* {} () \"{}\" ", verb, DELIMITER));
                w.mailbox(&mailbox.name);
                w.verbatim("\r\n");
            }
        }

        Ok(())
    }

    fn status(
        &self,
        name: &str,
        atts: &[StatusAtt],
        w: &mut LexWriter,
    ) -> Result<(), Error> {
        let mailbox = self.backend.get_mailbox(name)?;
        let status = self.backend.status(mailbox);

        w.verbatim("* STATUS ");
        w.mailbox(name);
        w.verbatim(" (");
        for (ix, att) in atts.iter().enumerate() {
            if ix > 0 {
                w.verbatim(" ");
            }
            let (label, value) = match *att {
                StatusAtt::Messages => ("MESSAGES", status.messages),
                StatusAtt::Recent => ("RECENT", status.recent),
                StatusAtt::UidNext => ("UIDNEXT", status.uid_next),
                StatusAtt::UidValidity => ("UIDVALIDITY", status.uid_validity),
                StatusAtt::Unseen => ("UNSEEN", status.unseen),
            };
            w.verbatim(label);
            w.verbatim(" ");
            w.num(value);
        }
        w.verbatim(")\r\n");
        Ok(())
    }

    fn select(
        &mut self,
        name: &str,
        verb: &str,
        w: &mut LexWriter,
    ) -> Result<String, Error> {
        self.require_auth()?;
        // A failed SELECT leaves no mailbox selected
        self.selected = None;
        let mailbox = self.backend.get_mailbox(name)?;
        let status = self.backend.status(mailbox);

        w.verbatim("* FLAGS (");
        for (ix, flag) in status.flags.iter().enumerate() {
            if ix > 0 {
                w.verbatim(" ");
            }
            w.flag(flag);
        }
        w.verbatim(")\r\n");
        w.verbatim(&format!(
            "* OK [PERMANENTFLAGS ({})] Flags permitted\r\n",
            status.permanent_flags.join(" ")
        ));
        w.verbatim(&format!("* {} EXISTS\r\n", status.messages));
        w.verbatim(&format!("* {} RECENT\r\n", status.recent));
        w.verbatim(&format!(
            "* OK [UIDVALIDITY {}] UIDs valid\r\n",
            status.uid_validity
        ));
        w.verbatim(&format!(
            "* OK [UIDNEXT {}] Predicted next UID\r\n",
            status.uid_next
        ));

        self.selected = Some(mailbox);
        info!("{} Selected {}", self.log_prefix, name);
        Ok(format!("[READ-ONLY] {} completed", verb))
    }

    fn fetch(
        &self,
        mailbox: usize,
        uid: bool,
        raw_seqset: &str,
        mut atts: Vec<FetchAtt>,
        w: &mut LexWriter,
    ) -> Result<(), Error> {
        let mb = self.backend.mailbox(mailbox);
        let seqset = SeqSet::parse(raw_seqset, mb.len())
            .ok_or_else(|| Error::BadSequenceSet(raw_seqset.to_owned()))?;

        if uid && !atts.contains(&FetchAtt::Uid) {
            atts.insert(0, FetchAtt::Uid);
        }

        for seq in self.backend.list_messages(mailbox, &seqset) {
            let message = match mb.message(seq) {
                Some(m) => m,
                None => continue,
            };

            w.verbatim(&format!("* {} FETCH (", seq));
            for (ix, att) in atts.iter().enumerate() {
                if ix > 0 {
                    w.verbatim(" ");
                }

                match *att {
                    FetchAtt::Uid => {
                        w.verbatim("UID ");
                        w.num(message.uid);
                    }
                    FetchAtt::Flags => {
                        w.verbatim("FLAGS (");
                        for (ix, flag) in message.flags.iter().enumerate() {
                            if ix > 0 {
                                w.verbatim(" ");
                            }
                            w.flag(flag);
                        }
                        w.verbatim(")");
                    }
                    FetchAtt::InternalDate => {
                        w.verbatim("INTERNALDATE ");
                        w.datetime(&message.internal_date);
                    }
                    FetchAtt::Rfc822Size => {
                        w.verbatim("RFC822.SIZE ");
                        w.num(message.size);
                    }
                    FetchAtt::Rfc822 => {
                        let body = self.backend.message_body(mailbox, seq)?;
                        w.verbatim("RFC822 ");
                        w.literal(&body);
                    }
                    FetchAtt::Rfc822Header => {
                        let body = self.backend.message_body(mailbox, seq)?;
                        w.verbatim("RFC822.HEADER ");
                        w.literal(rfc822::split(&body).0);
                    }
                    FetchAtt::Rfc822Text => {
                        let body = self.backend.message_body(mailbox, seq)?;
                        w.verbatim("RFC822.TEXT ");
                        w.literal(rfc822::split(&body).1);
                    }
                    FetchAtt::Body {
                        ref section,
                        partial,
                        ..
                    } => {
                        let body = self.backend.message_body(mailbox, seq)?;
                        let (header, text) = rfc822::split(&body);
                        let filtered;
                        let data: &[u8] = match *section {
                            Section::Full => &body[..],
                            Section::Header => header,
                            Section::Text => text,
                            Section::HeaderFields { not, ref fields } => {
                                filtered =
                                    rfc822::header_fields(header, fields, not);
                                &filtered[..]
                            }
                        };

                        w.verbatim(&format!("BODY[{}]", section_name(section)));
                        match partial {
                            None => {
                                w.verbatim(" ");
                                w.literal(data);
                            }
                            Some((offset, len)) => {
                                w.verbatim(&format!("<{}> ", offset));
                                let start = (offset as usize).min(data.len());
                                let end = start
                                    .saturating_add(len as usize)
                                    .min(data.len());
                                w.literal(&data[start..end]);
                            }
                        }
                    }
                }
            }
            w.verbatim(")\r\n");
        }

        Ok(())
    }
}

fn section_name(section: &Section) -> String {
    match *section {
        Section::Full => String::new(),
        Section::Header => "HEADER".to_owned(),
        Section::Text => "TEXT".to_owned(),
        Section::HeaderFields { not, ref fields } => format!(
            "HEADER.FIELDS{} ({})",
            if not { ".NOT" } else { "" },
            fields.join(" ")
        ),
    }
}

/// Translate a LIST pattern into an anchored regex.
///
/// Since folder names are flat, `%` and `*` are equivalent.
fn list_matcher(pattern: &str) -> Option<Regex> {
    let body = pattern
        .split(|c| '*' == c || '%' == c)
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body)).ok()
}
