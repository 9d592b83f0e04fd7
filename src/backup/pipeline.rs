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

//! The three-stage download pipeline for one folder.
//!
//! ```text
//! ranges ─▶ [retrieve] ─ responses ─▶ [deliver] ─ entries ─▶ [persist]
//! ```
//!
//! Retrieval issues one fetch per range on the remote, through a fetch
//! thread of its own, and forwards every response. Delivery turns each
//! response into an `Email` and writes it into the Maildir. Persistence
//! collects the oldmail entries of delivered messages and writes the state
//! file once everything has drained.
//!
//! All channels are bounded, so a slow stage stalls the ones before it. A
//! failure concerning one message is counted against the stage it happened
//! in and never stops the other stages.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::maildir::layout::{self, UniqueNamer};
use crate::maildir::oldmail::{self, OldmailEntry};
use crate::remote::fetch_item::{Email, FetchItem};
use crate::remote::session::Remote;
use crate::support::error::Error;
use crate::support::interrupt::Interrupter;
use crate::support::ranges::Range;

/// Capacity of every channel between stages.
pub const CHANNEL_CAPACITY: usize = 16;

/// Everything a pipeline needs to know about the folder it works on.
#[derive(Clone, Copy)]
pub struct Pipeline<'a> {
    pub folder_path: &'a Path,
    pub oldmail_path: &'a Path,
    pub uid_validity: u32,
    pub namer: &'a UniqueNamer,
    pub interrupter: &'a Interrupter,
    pub log_prefix: &'a str,
}

#[derive(Debug, Default)]
struct Counters {
    retrieve: AtomicUsize,
    deliver: AtomicUsize,
    persist: AtomicUsize,
}

/// What happened during one pipeline run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Messages delivered and recorded in the state file.
    pub delivered: usize,
    pub retrieve_errors: usize,
    pub deliver_errors: usize,
    pub persist_errors: usize,
    /// Whether retrieval stopped early because of an interrupt.
    pub interrupted: bool,
}

impl Outcome {
    /// The error to report for this run, if any.
    pub fn error(&self) -> Option<Error> {
        if self.retrieve_errors + self.deliver_errors + self.persist_errors > 0
        {
            Some(Error::PipelineErrors {
                retrieve: self.retrieve_errors,
                deliver: self.deliver_errors,
                persist: self.persist_errors,
            })
        } else {
            None
        }
    }
}

impl<'a> Pipeline<'a> {
    /// Download the messages at `ranges` from `remote`.
    ///
    /// The state file is rewritten with `existing` followed by the entries of
    /// every message delivered, in delivery order. This happens even when
    /// retrieval fails or is interrupted part way.
    pub fn run(
        &self,
        remote: &mut dyn Remote,
        ranges: &[Range],
        existing: Vec<OldmailEntry>,
    ) -> Result<Outcome, Error> {
        let counters = Counters::default();
        let interrupted = AtomicBool::new(false);

        // Nothing is ever sent on the latch; dropping the sender releases
        // every worker at once.
        let (latch_send, latch_recv) = channel::bounded::<()>(0);
        let (response_send, response_recv) =
            channel::bounded::<Vec<FetchItem>>(CHANNEL_CAPACITY);
        let (entry_send, entry_recv) =
            channel::bounded::<OldmailEntry>(CHANNEL_CAPACITY);

        let delivered = crossbeam::scope(|s| {
            let persist = {
                let latch = latch_recv.clone();
                let counters = &counters;
                s.spawn(move |_| {
                    let _ = latch.recv();
                    self.persist(entry_recv, existing, counters)
                })
            };

            {
                let latch = latch_recv.clone();
                let counters = &counters;
                s.spawn(move |_| {
                    let _ = latch.recv();
                    self.deliver(response_recv, entry_send, counters);
                });
            }

            {
                let latch = latch_recv;
                let counters = &counters;
                let interrupted = &interrupted;
                s.spawn(move |_| {
                    let _ = latch.recv();
                    self.retrieve(
                        remote,
                        ranges,
                        response_send,
                        counters,
                        interrupted,
                    );
                });
            }

            drop(latch_send);
            persist.join()
        })
        .map_err(|_| Error::WorkerPanicked)?
        .map_err(|_| Error::WorkerPanicked)?;

        let outcome = Outcome {
            delivered,
            retrieve_errors: counters.retrieve.load(Ordering::SeqCst),
            deliver_errors: counters.deliver.load(Ordering::SeqCst),
            persist_errors: counters.persist.load(Ordering::SeqCst),
            interrupted: interrupted.load(Ordering::SeqCst),
        };
        info!(
            "{} Delivered {} messages ({}/{}/{} errors)",
            self.log_prefix,
            outcome.delivered,
            outcome.retrieve_errors,
            outcome.deliver_errors,
            outcome.persist_errors
        );
        Ok(outcome)
    }

    fn retrieve(
        &self,
        remote: &mut dyn Remote,
        ranges: &[Range],
        output: Sender<Vec<FetchItem>>,
        counters: &Counters,
        interrupted: &AtomicBool,
    ) {
        for &range in ranges {
            if self.interrupter.interrupted() {
                interrupted.store(true, Ordering::SeqCst);
                break;
            }

            debug!("{} Fetching {}", self.log_prefix, range);
            let (library_send, library_recv) =
                channel::bounded::<Vec<FetchItem>>(CHANNEL_CAPACITY);
            let remote = &mut *remote;

            let result = crossbeam::scope(|s| {
                let fetcher =
                    s.spawn(move |_| remote.fetch_bodies(range, &library_send));

                let mut stopped = false;
                for response in library_recv.iter() {
                    if output.send(response).is_err() {
                        break;
                    }

                    if self.interrupter.interrupted() {
                        stopped = true;
                        break;
                    }
                }
                // The fetcher notices this on its next send and stops
                drop(library_recv);

                (fetcher.join(), stopped)
            });

            match result {
                Ok((Ok(Ok(())), stopped)) => {
                    if stopped {
                        interrupted.store(true, Ordering::SeqCst);
                        break;
                    }
                }
                Ok((Ok(Err(e)), _)) => {
                    error!(
                        "{} Fetching {} failed: {}",
                        self.log_prefix, range, e
                    );
                    counters.retrieve.fetch_add(1, Ordering::SeqCst);
                    break;
                }
                Ok((Err(_), _)) | Err(_) => {
                    error!("{} Fetch thread panicked", self.log_prefix);
                    counters.retrieve.fetch_add(1, Ordering::SeqCst);
                    break;
                }
            }
        }

        if interrupted.load(Ordering::SeqCst) {
            warn!("{} Interrupted, not fetching any more", self.log_prefix);
        }
    }

    fn deliver(
        &self,
        input: Receiver<Vec<FetchItem>>,
        output: Sender<OldmailEntry>,
        counters: &Counters,
    ) {
        for response in input {
            let delivered = Email::from_items(response).and_then(|email| {
                layout::deliver(self.folder_path, self.namer, &email.body)?;
                Ok(email.oldmail_entry(self.uid_validity))
            });

            match delivered {
                Ok(entry) => {
                    if output.send(entry).is_err() {
                        // Only possible if persistence died, in which case
                        // there is nowhere to remember anything anyway.
                        error!(
                            "{} Lost the state file writer",
                            self.log_prefix
                        );
                        counters.deliver.fetch_add(1, Ordering::SeqCst);
                        break;
                    }
                }
                Err(e) => {
                    error!(
                        "{} Failed to deliver message: {}",
                        self.log_prefix, e
                    );
                    counters.deliver.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    fn persist(
        &self,
        input: Receiver<OldmailEntry>,
        mut entries: Vec<OldmailEntry>,
        counters: &Counters,
    ) -> usize {
        let before = entries.len();
        entries.extend(input);
        let delivered = entries.len() - before;

        if let Err(e) = oldmail::write(&entries, self.oldmail_path) {
            error!("{} {}", self.log_prefix, e);
            counters.persist.fetch_add(1, Ordering::SeqCst);
        }

        delivered
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;

    use chrono::prelude::*;
    use tempfile::TempDir;

    use super::*;
    use crate::maildir::layout::{MaildirPath, NEW, TMP};

    /// Serves canned responses, addressed by sequence number.
    struct FakeRemote {
        messages: Vec<Vec<FetchItem>>,
        requested: Vec<Range>,
        fail_from: Option<i64>,
        stop_before: Option<(i64, Arc<Interrupter>)>,
    }

    impl FakeRemote {
        fn new(messages: Vec<Vec<FetchItem>>) -> Self {
            FakeRemote {
                messages,
                requested: vec![],
                fail_from: None,
                stop_before: None,
            }
        }
    }

    impl Remote for FakeRemote {
        fn fetch_bodies(
            &mut self,
            range: Range,
            sink: &Sender<Vec<FetchItem>>,
        ) -> Result<(), Error> {
            self.requested.push(range);
            if self.fail_from.map_or(false, |f| range.start >= f) {
                return Err(Error::Network("connection reset".to_owned()));
            }

            for seqnum in range.start..range.end {
                if let Some((at, ref interrupter)) = self.stop_before {
                    if at == seqnum {
                        interrupter.request_stop();
                    }
                }

                let response = self.messages[seqnum as usize - 1].clone();
                if sink.send(response).is_err() {
                    break;
                }
            }
            Ok(())
        }
    }

    fn message(uid: u32) -> Vec<FetchItem> {
        vec![
            FetchItem::Uid(uid),
            FetchItem::Timestamp(
                FixedOffset::east(0).timestamp(1_600_000_000 + uid as i64, 0),
            ),
            FetchItem::HeaderName("RFC822".to_owned()),
            FetchItem::Body(format!("Subject: {}\r\n\r\nbody", uid).into()),
        ]
    }

    struct Setup {
        root: TempDir,
        md: MaildirPath,
        oldmail: PathBuf,
        namer: UniqueNamer,
    }

    fn set_up() -> Setup {
        crate::init_test_log();

        let root = TempDir::new().unwrap();
        let md = MaildirPath::new(root.path(), "INBOX").unwrap();
        let oldmail = root.path().join("oldmail-test");
        md.create(&oldmail).unwrap();
        Setup {
            root,
            md,
            oldmail,
            namer: UniqueNamer::with_hostname("test").unwrap(),
        }
    }

    impl Setup {
        fn run(
            &self,
            interrupter: &Interrupter,
            remote: &mut FakeRemote,
            ranges: &[Range],
            existing: Vec<OldmailEntry>,
        ) -> Outcome {
            let folder_path = self.md.folder_path();
            Pipeline {
                folder_path: &folder_path,
                oldmail_path: &self.oldmail,
                uid_validity: 42,
                namer: &self.namer,
                interrupter,
                log_prefix: "test",
            }
            .run(remote, ranges, existing)
            .unwrap()
        }

        fn delivered_files(&self) -> usize {
            fs::read_dir(self.md.folder_path().join(NEW))
                .unwrap()
                .count()
        }
    }

    #[test]
    fn cold_fresh_folder() {
        let setup = set_up();
        let interrupter = Interrupter::new(vec![]);
        let mut remote =
            FakeRemote::new(vec![message(1), message(2), message(3)]);

        let outcome =
            setup.run(&interrupter, &mut remote, &[Range::new(1, 4)], vec![]);
        assert_eq!(
            Outcome {
                delivered: 3,
                ..Outcome::default()
            },
            outcome
        );
        assert!(outcome.error().is_none());
        assert_eq!(3, setup.delivered_files());
        assert_eq!(
            0,
            fs::read_dir(setup.md.folder_path().join(TMP)).unwrap().count()
        );

        let data = fs::read(&setup.oldmail).unwrap();
        assert_eq!(
            b"42/1\x001600000001\n42/2\x001600000002\n42/3\x001600000003\n"
                .to_vec(),
            data
        );
        assert!(setup.root.path().join("oldmail-test").is_file());
    }

    #[test]
    fn existing_entries_are_kept_first() {
        let setup = set_up();
        let interrupter = Interrupter::new(vec![]);
        let mut remote =
            FakeRemote::new(vec![message(1), message(5), message(6)]);
        let existing =
            oldmail::decode(b"42/1\x00100\n", &setup.oldmail).unwrap();

        let outcome = setup.run(
            &interrupter,
            &mut remote,
            &[Range::new(2, 4)],
            existing,
        );
        assert_eq!(2, outcome.delivered);
        assert_eq!(vec![Range::new(2, 4)], remote.requested);

        let entries = oldmail::read(&setup.oldmail).unwrap();
        assert_eq!(
            vec![1, 5, 6],
            entries.iter().map(|e| e.uid).collect::<Vec<_>>()
        );
    }

    #[test]
    fn malformed_response_is_counted_and_skipped() {
        let setup = set_up();
        let interrupter = Interrupter::new(vec![]);
        let mut broken = message(2);
        broken.truncate(2);
        let mut remote = FakeRemote::new(vec![message(1), broken, message(3)]);

        let outcome =
            setup.run(&interrupter, &mut remote, &[Range::new(1, 4)], vec![]);
        assert_eq!(2, outcome.delivered);
        assert_eq!(2, setup.delivered_files());
        assert_eq!(
            "there were 0/1/0 errors while: \
             retrieving/delivering/remembering mail",
            outcome.error().unwrap().to_string()
        );

        let entries = oldmail::read(&setup.oldmail).unwrap();
        assert_eq!(
            vec![1, 3],
            entries.iter().map(|e| e.uid).collect::<Vec<_>>()
        );
    }

    #[test]
    fn fetch_failure_stops_further_ranges() {
        let setup = set_up();
        let interrupter = Interrupter::new(vec![]);
        let mut remote = FakeRemote::new(vec![
            message(1),
            message(2),
            message(3),
            message(4),
        ]);
        remote.fail_from = Some(3);

        let outcome = setup.run(
            &interrupter,
            &mut remote,
            &[Range::new(1, 2), Range::new(3, 4), Range::new(4, 5)],
            vec![],
        );
        assert_eq!(1, outcome.delivered);
        assert_eq!(1, outcome.retrieve_errors);
        assert_eq!(
            vec![Range::new(1, 2), Range::new(3, 4)],
            remote.requested
        );
        assert_eq!(1, oldmail::read(&setup.oldmail).unwrap().len());
    }

    #[test]
    fn interrupt_before_start_fetches_nothing() {
        let setup = set_up();
        let interrupter = Interrupter::new(vec![]);
        interrupter.request_stop();
        let mut remote = FakeRemote::new(vec![message(1)]);
        let existing =
            oldmail::decode(b"42/9\x00100\n", &setup.oldmail).unwrap();

        let outcome = setup.run(
            &interrupter,
            &mut remote,
            &[Range::new(1, 2)],
            existing.clone(),
        );
        assert!(outcome.interrupted);
        assert_eq!(0, outcome.delivered);
        assert!(remote.requested.is_empty());
        assert_eq!(existing, oldmail::read(&setup.oldmail).unwrap());
    }

    #[test]
    fn interrupt_mid_range_drains_what_was_fetched() {
        let setup = set_up();
        let mut remote = FakeRemote::new(vec![
            message(1),
            message(2),
            message(3),
            message(4),
        ]);
        let interrupter = Interrupter::new(vec![]);
        remote.stop_before = Some((2, Arc::clone(&interrupter)));

        let outcome = setup.run(
            &interrupter,
            &mut remote,
            &[Range::new(1, 4), Range::new(4, 5)],
            vec![],
        );
        assert!(outcome.interrupted);
        assert!(outcome.delivered >= 1 && outcome.delivered <= 2);
        assert_eq!(vec![Range::new(1, 4)], remote.requested);
        // Everything delivered is remembered
        assert_eq!(outcome.delivered, setup.delivered_files());
        assert_eq!(
            outcome.delivered,
            oldmail::read(&setup.oldmail).unwrap().len()
        );
    }
}
