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

//! The connection loop of the read-only IMAP server.
//!
//! Lines are read until a complete command (including any literals) is
//! buffered, then handed to the `CommandProcessor`. Each connection gets a
//! thread of its own; there is no TLS since the server only ever listens on
//! the loopback interface.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::str;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lazy_static::lazy_static;
use log::{error, info, warn};
use regex::bytes::Regex;

use super::backend::Backend;
use super::command_processor::CommandProcessor;
use crate::support::error::Error;
use crate::support::interrupt::Interrupter;

const MAX_CMDLINE: usize = 65536;
const ACCEPT_POLL: Duration = Duration::from_millis(100);

lazy_static! {
    static ref LITERAL_AT_EOL: Regex =
        Regex::new(r#"\{([0-9]+)\+?\}$"#).unwrap();
    static ref APPEND_START: Regex =
        Regex::new(r#"(?i)^[^ ]+ APPEND "#).unwrap();
}

pub struct Server {
    read: Box<dyn BufRead + Send>,
    write: Box<dyn Write + Send>,
    processor: CommandProcessor,
    sent_bye: bool,
}

impl Server {
    pub fn new<R: BufRead + Send + 'static, W: Write + Send + 'static>(
        read: R,
        write: W,
        processor: CommandProcessor,
    ) -> Self {
        Server {
            read: Box::new(read),
            write: Box::new(write),
            processor,
            sent_bye: false,
        }
    }

    /// Run the server.
    ///
    /// Blocks until an error occurs, the client logs out, or a BYE response
    /// has been sent.
    pub fn run(&mut self) -> Result<(), Error> {
        let greeting = self.processor.greet();
        self.send(&greeting)?;

        let mut cmdline = Vec::<u8>::new();

        while !self.sent_bye && !self.processor.logged_out() {
            let nread = match self.buffer_next_line(&mut cmdline)? {
                Some(n) => n,
                None => continue,
            };

            if let Some((before_literal, length, literal_plus)) =
                check_literal(&cmdline, nread)
            {
                if APPEND_START.is_match(&cmdline[..before_literal]) {
                    // Refused before the client sends any of the message
                    let tag = tag_of(&cmdline).unwrap_or_default();
                    let response = self.processor.reject_append(&tag);
                    self.send(&response)?;
                    self.discard_command(
                        &mut cmdline,
                        Some((length, literal_plus)),
                    )?;
                    continue;
                }

                cmdline.extend_from_slice(b"\r\n");
                if length as usize + cmdline.len() > MAX_CMDLINE {
                    self.command_line_too_long(
                        &mut cmdline,
                        Some((length, literal_plus)),
                    )?;
                    continue;
                }

                self.accept_literal(literal_plus)?;
                let nread = self
                    .read
                    .by_ref()
                    .take(u64::from(length))
                    .read_to_end(&mut cmdline)?;
                if nread != length as usize {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "EOF reading literal",
                    )));
                }
            } else {
                let response = self.processor.handle_line(&cmdline);
                self.send(&response)?;
                cmdline.clear();
            }
        }

        Ok(())
    }

    /// Read the next line, appending it to `cmdline`.
    ///
    /// Returns the number of bytes added to `cmdline`, not counting the line
    /// ending, which is removed. Both CRLF and bare LF are accepted.
    ///
    /// If the maximum command line length is exceeded, says BYE and returns
    /// `None`.
    fn buffer_next_line(
        &mut self,
        cmdline: &mut Vec<u8>,
    ) -> Result<Option<usize>, Error> {
        let mut nread = self
            .read
            .by_ref()
            .take(MAX_CMDLINE as u64)
            .read_until(b'\n', cmdline)?;

        if 0 == nread {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "EOF reached before reading full line",
            )));
        }

        if cmdline.len() > MAX_CMDLINE || !cmdline.ends_with(b"\n") {
            self.command_line_too_long(cmdline, None)?;
            return Ok(None);
        }

        cmdline.pop();
        nread -= 1;
        if cmdline.ends_with(b"\r") {
            cmdline.pop();
            nread -= 1;
        }

        Ok(Some(nread))
    }

    /// Send the continuation for a synchronising literal.
    fn accept_literal(&mut self, literal_plus: bool) -> Result<(), Error> {
        if !literal_plus {
            self.send(b"+ go\r\n")?;
        }

        Ok(())
    }

    /// Reject a command which is too long.
    ///
    /// If the excess is an announced literal, the command is refused with a
    /// tagged NO and skipped. Otherwise the stream cannot be resynchronised
    /// and the connection is closed with BYE.
    fn command_line_too_long(
        &mut self,
        cmdline: &mut Vec<u8>,
        literal_info: Option<(u32, bool)>,
    ) -> Result<(), Error> {
        match (literal_info, tag_of(cmdline)) {
            (Some(_), Some(tag)) => {
                self.send(
                    format!("{} NO Command line too long\r\n", tag).as_bytes(),
                )?;
                self.discard_command(cmdline, literal_info)?;
            }
            _ => {
                self.send(b"* BYE Command line too long\r\n")?;
                self.sent_bye = true;
                cmdline.clear();
            }
        }

        Ok(())
    }

    /// Discard the rest of a command whose first part is in `cmdline`.
    ///
    /// `literal_info` describes the unconsumed literal at the end of
    /// `cmdline`. A synchronising literal has already been aborted by the
    /// response the caller sent; a non-synchronising one must be skipped.
    fn discard_command(
        &mut self,
        cmdline: &mut Vec<u8>,
        mut literal_info: Option<(u32, bool)>,
    ) -> Result<(), Error> {
        while !self.sent_bye {
            if let Some((len, literal_plus)) = literal_info.take() {
                if !literal_plus {
                    break;
                }

                io::copy(
                    &mut self.read.by_ref().take(u64::from(len)),
                    &mut io::sink(),
                )?;
            }

            cmdline.clear();
            let nread = match self.buffer_next_line(cmdline)? {
                Some(n) => n,
                None => break,
            };

            match check_literal(cmdline, nread) {
                Some((_, len, literal_plus)) => {
                    literal_info = Some((len, literal_plus))
                }
                // End of line without literal; command is done
                None => break,
            }
        }

        cmdline.clear();
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        self.write.write_all(data)?;
        self.write.flush()?;
        Ok(())
    }
}

/// Check whether the last `nread` bytes of `cmdline` end with a literal.
///
/// Returns the length of the command line before the literal marker, the
/// literal length, and whether it is non-synchronising.
fn check_literal(cmdline: &[u8], nread: usize) -> Option<(usize, u32, bool)> {
    let start = cmdline.len() - nread;
    let captures = LITERAL_AT_EOL.captures(&cmdline[start..])?;
    let m0 = captures.get(0)?;
    let len = str::from_utf8(captures.get(1)?.as_bytes())
        .ok()?
        .parse::<u32>()
        .ok()?;
    Some((start + m0.start(), len, m0.as_bytes().contains(&b'+')))
}

fn tag_of(cmdline: &[u8]) -> Option<String> {
    let tag = cmdline.split(|&b| b' ' == b).next()?;
    if tag.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(tag).into_owned())
    }
}

/// Accept connections on `listener` until `interrupter` trips.
///
/// Connections still open at that point are abandoned with their threads.
pub fn serve(
    listener: TcpListener,
    backend: Arc<Backend>,
    interrupter: &Interrupter,
) -> Result<(), Error> {
    listener.set_nonblocking(true)?;
    info!("Listening on {}", listener.local_addr()?);

    while !interrupter.interrupted() {
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                let backend = Arc::clone(&backend);
                thread::Builder::new()
                    .name(format!("imap:{}", peer))
                    .spawn(move || handle_connection(stream, peer, backend))?;
            }
            Err(e) if io::ErrorKind::WouldBlock == e.kind() => {
                match interrupter.interrupt() {
                    // A signal consumed here must still trip the controller
                    Some(signals) => {
                        if signals.recv_timeout(ACCEPT_POLL).is_ok() {
                            interrupter.request_stop();
                        }
                    }
                    None => thread::sleep(ACCEPT_POLL),
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!("Server stopped");
    Ok(())
}

fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    backend: Arc<Backend>,
) {
    let log_prefix = format!("imap:{}", peer);
    info!("{} Connection established", log_prefix);

    let read = match stream.try_clone() {
        Ok(read) => read,
        Err(e) => {
            error!("{} Failed to set up connection: {}", log_prefix, e);
            return;
        }
    };

    let processor = CommandProcessor::new(log_prefix.clone(), backend);
    let mut server = Server::new(BufReader::new(read), stream, processor);
    match server.run() {
        Ok(()) => info!("{} Normal client disconnect", log_prefix),
        Err(Error::Io(e)) if io::ErrorKind::UnexpectedEof == e.kind() => {
            info!("{} Connection closed by client", log_prefix)
        }
        Err(e) => warn!("{} Abnormal client disconnect: {}", log_prefix, e),
    }
}
