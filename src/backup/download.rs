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

//! Per-folder orchestration of a backup run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use super::pipeline::Pipeline;
use super::reconcile::missing_ranges;
use crate::maildir::layout::{MaildirPath, UniqueNamer};
use crate::maildir::oldmail;
use crate::remote::folders::expand_folders;
use crate::remote::session::{ImapConfig, Session};
use crate::support::error::Error;
use crate::support::interrupt::Interrupter;
use crate::support::lockfile;
use crate::support::ranges::{accumulate_ranges, canonicalise_ranges, Range};
use crate::support::safe_name::local_folder_name;
use crate::support::threading::WorkerPool;

/// Name of the lock file inside each folder directory.
pub const LOCK_FILE: &str = ".igrab.lock";

/// Parameters shared by every folder of one backup run.
pub struct Backup<'a> {
    pub cfg: &'a ImapConfig,
    /// The Maildir base directory.
    pub base: &'a Path,
    /// How many folders to back up concurrently.
    pub threads: usize,
    pub lock_timeout: Duration,
    /// Optional restriction on the sequence numbers downloaded, possibly with
    /// negative endpoints.
    pub window: &'a [Range],
    pub interrupter: &'a Arc<Interrupter>,
    pub namer: &'a UniqueNamer,
}

/// Log in and resolve `specs` against the server's folder list.
pub fn resolve_folders(
    cfg: &ImapConfig,
    specs: &[String],
) -> Result<Vec<String>, Error> {
    let mut session = Session::authenticate(cfg)?;
    let available = session.list()?;
    session.logout()?;
    Ok(expand_folders(specs, &available))
}

/// The Maildir and state file paths for remote folder `folder`.
fn local_paths(
    cfg: &ImapConfig,
    base: &Path,
    folder: &str,
) -> Result<(MaildirPath, PathBuf), Error> {
    let local = local_folder_name(folder);
    let md = MaildirPath::new(base, &local)?;
    let oldmail_path =
        oldmail::path(base, &cfg.server, cfg.port, &cfg.user, &local);
    Ok((md, oldmail_path))
}

/// Create Maildirs and empty state files for `folders` under `base`.
///
/// Folders which are already valid backups are left alone.
pub fn init_folders(
    cfg: &ImapConfig,
    base: &Path,
    folders: &[String],
) -> Result<(), Error> {
    for folder in folders {
        let (md, oldmail_path) = local_paths(cfg, base, folder)?;
        if md.is_valid(&oldmail_path) {
            info!("{} already initialised", md.folder_path().display());
        } else if md.is_absent(&oldmail_path) {
            md.create(&oldmail_path)?;
        } else {
            return Err(Error::MaildirInvalid(md.folder_path()));
        }
    }

    Ok(())
}

/// Clamp a user window to what exists in a folder of `count` messages, then
/// canonicalise it.
fn resolve_window(window: &[Range], count: u32) -> Result<Vec<Range>, Error> {
    let max = i64::from(count) + 1;
    let clamped = window
        .iter()
        .map(|r| {
            let start = if r.start < 0 {
                r.start.max(-i64::from(count))
            } else {
                r.start
            };
            Range::new(start, r.end.min(max))
        })
        .collect::<Vec<_>>();
    canonicalise_ranges(&clamped, 1, max)
}

/// The two ways of ending a session.
trait HangUp {
    fn logout(self) -> Result<(), Error>;
    fn terminate(self);
}

impl HangUp for Session {
    fn logout(self) -> Result<(), Error> {
        Session::logout(self)
    }

    fn terminate(self) {
        Session::terminate(self)
    }
}

/// End `session` after a folder finished with `result`, and decide what to
/// report.
///
/// An interrupted folder is terminated rather than logged out, and reports
/// `Interrupted` unless it already failed. A download error takes precedence
/// over a logout error.
fn hang_up(
    session: impl HangUp,
    result: Result<(), Error>,
    interrupted: bool,
    log_prefix: &str,
) -> Result<(), Error> {
    let logout_result = if interrupted {
        session.terminate();
        Ok(())
    } else {
        session.logout()
    };

    match (result, logout_result) {
        (Err(e), Err(logout_error)) => {
            warn!("{} Logout failed: {}", log_prefix, logout_error);
            Err(e)
        }
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(())) if interrupted => Err(Error::Interrupted),
        (Ok(()), Ok(())) => Ok(()),
    }
}

impl<'a> Backup<'a> {
    /// Back up every folder `specs` resolve to.
    ///
    /// Every folder is attempted even if others fail. Returns the first
    /// error encountered, if any.
    pub fn run(&self, specs: &[String]) -> Result<(), Error> {
        let _registration = self.interrupter.register()?;
        let folders = resolve_folders(self.cfg, specs)?;
        info!(
            "Backing up {} folders from {}@{}",
            folders.len(),
            self.cfg.user,
            self.cfg.server
        );

        let mut first_error = None;
        WorkerPool::new(self.threads).run(
            &folders,
            |folder| (folder, self.download_folder(folder)),
            |(folder, result)| {
                if let Err(e) = result {
                    error!("{} {}", self.cfg.log_prefix(folder), e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            },
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Back up the single remote folder `folder`.
    pub fn download_folder(&self, folder: &str) -> Result<(), Error> {
        let log_prefix = self.cfg.log_prefix(folder);
        let _registration = self.interrupter.register()?;
        if self.interrupter.interrupted() {
            return Err(Error::Interrupted);
        }

        let (md, oldmail_path) = local_paths(self.cfg, self.base, folder)?;
        let mut lock = lockfile::lock(
            md.folder_path().join(LOCK_FILE),
            self.lock_timeout,
        )?;

        let mut session = Session::authenticate(self.cfg)?;
        let result = self.download_with_session(
            &mut session,
            folder,
            &md,
            &oldmail_path,
            &log_prefix,
        );

        let interrupted = self.interrupter.interrupted();
        let result = hang_up(session, result, interrupted, &log_prefix);
        lock.release();
        result
    }

    fn download_with_session(
        &self,
        session: &mut Session,
        folder: &str,
        md: &MaildirPath,
        oldmail_path: &Path,
        log_prefix: &str,
    ) -> Result<(), Error> {
        let status = session.select(folder)?;

        if !md.is_valid(oldmail_path) {
            if !md.is_absent(oldmail_path) {
                return Err(Error::MaildirInvalid(md.folder_path()));
            }

            let mut created = Ok(());
            if !self
                .interrupter
                .uninterruptible(|| created = md.create(oldmail_path))
            {
                return Err(Error::Interrupted);
            }
            created?;
        }

        let existing = oldmail::read(oldmail_path)?;
        let uids = session.fetch_uids()?;
        let window = if self.window.is_empty() || uids.is_empty() {
            None
        } else {
            Some(resolve_window(self.window, status.message_count)?)
        };
        let ranges = missing_ranges(&existing, &uids, window.as_deref())?;

        if ranges.is_empty() {
            info!("{} Nothing new", log_prefix);
            return oldmail::write(&existing, oldmail_path);
        }

        info!(
            "{} Downloading {} of {} messages",
            log_prefix,
            accumulate_ranges(&ranges),
            uids.len()
        );
        let folder_path = md.folder_path();
        let outcome = Pipeline {
            folder_path: &folder_path,
            oldmail_path,
            uid_validity: status.uid_validity,
            namer: self.namer,
            interrupter: self.interrupter,
            log_prefix,
        }
        .run(session, &ranges, existing)?;

        if outcome.interrupted {
            if let Some(e) = outcome.error() {
                warn!("{} {}", log_prefix, e);
            }
            return Err(Error::Interrupted);
        }

        match outcome.error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use std::cell::Cell;
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::imap::integration_tests::{client_config, start_server_with};
    use crate::maildir::layout::NEW;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Ending {
        LoggedOut,
        Terminated,
    }

    struct FakeSession<'a> {
        ending: &'a Cell<Option<Ending>>,
        logout_fails: bool,
    }

    impl HangUp for FakeSession<'_> {
        fn logout(self) -> Result<(), Error> {
            self.ending.set(Some(Ending::LoggedOut));
            if self.logout_fails {
                Err(Error::Network("connection reset".to_owned()))
            } else {
                Ok(())
            }
        }

        fn terminate(self) {
            self.ending.set(Some(Ending::Terminated));
        }
    }

    fn end(
        result: Result<(), Error>,
        interrupted: bool,
        logout_fails: bool,
    ) -> (Result<(), Error>, Option<Ending>) {
        let ending = Cell::new(None);
        let session = FakeSession {
            ending: &ending,
            logout_fails,
        };
        let result = hang_up(session, result, interrupted, "test");
        (result, ending.get())
    }

    #[test]
    fn clean_finish_logs_out() {
        let (result, ending) = end(Ok(()), false, false);
        assert_matches!(Ok(()), result);
        assert_eq!(Some(Ending::LoggedOut), ending);
    }

    #[test]
    fn interrupted_folder_is_terminated() {
        let (result, ending) = end(Ok(()), true, true);
        assert_matches!(Err(Error::Interrupted), result);
        assert_eq!(Some(Ending::Terminated), ending);

        let (result, ending) = end(Err(Error::AuthFailed), true, false);
        assert_matches!(Err(Error::AuthFailed), result);
        assert_eq!(Some(Ending::Terminated), ending);
    }

    #[test]
    fn download_error_beats_logout_error() {
        let (result, _) = end(
            Err(Error::MissingUidValidity("INBOX".to_owned())),
            false,
            true,
        );
        assert_matches!(Err(Error::MissingUidValidity(_)), result);

        let (result, ending) = end(Ok(()), false, true);
        assert_matches!(Err(Error::Network(_)), result);
        assert_eq!(Some(Ending::LoggedOut), ending);
    }

    fn backup<'a>(
        cfg: &'a ImapConfig,
        base: &'a Path,
        interrupter: &'a Arc<Interrupter>,
        namer: &'a UniqueNamer,
    ) -> Backup<'a> {
        Backup {
            cfg,
            base,
            threads: 1,
            lock_timeout: Duration::from_millis(100),
            window: &[],
            interrupter,
            namer,
        }
    }

    #[test]
    fn locked_folder_times_out_without_stopping_others() {
        let server = start_server_with(&["Archive"]);
        let dest = TempDir::new().unwrap();
        let cfg = client_config(server.port);
        let interrupter = Interrupter::new(vec![]);
        let namer = UniqueNamer::with_hostname("test.host").unwrap();

        let _held = lockfile::lock(
            dest.path().join("INBOX").join(LOCK_FILE),
            Duration::from_secs(1),
        )
        .unwrap();

        assert_matches!(
            Err(Error::LockTimeout { .. }),
            backup(&cfg, dest.path(), &interrupter, &namer)
                .run(&["_ALL_".to_owned()])
        );

        assert_eq!(
            1,
            fs::read_dir(dest.path().join("Archive").join(NEW))
                .unwrap()
                .count()
        );
        assert!(!dest.path().join("INBOX").join(NEW).exists());
    }

    #[test]
    fn partial_maildir_is_refused_and_lock_released() {
        let server = start_server_with(&[]);
        let dest = TempDir::new().unwrap();
        let cfg = client_config(server.port);
        let interrupter = Interrupter::new(vec![]);
        let namer = UniqueNamer::with_hostname("test.host").unwrap();

        fs::create_dir_all(dest.path().join("INBOX").join(NEW)).unwrap();

        assert_matches!(
            Err(Error::MaildirInvalid(_)),
            backup(&cfg, dest.path(), &interrupter, &namer)
                .download_folder("INBOX")
        );

        lockfile::lock(
            dest.path().join("INBOX").join(LOCK_FILE),
            Duration::from_millis(100),
        )
        .unwrap();
    }

    #[test]
    fn pending_interrupt_skips_folder() {
        let server = start_server_with(&[]);
        let dest = TempDir::new().unwrap();
        let cfg = client_config(server.port);
        let interrupter = Interrupter::new(vec![]);
        let namer = UniqueNamer::with_hostname("test.host").unwrap();

        let _registration = interrupter.register().unwrap();
        interrupter.request_stop();

        assert_matches!(
            Err(Error::Interrupted),
            backup(&cfg, dest.path(), &interrupter, &namer)
                .download_folder("INBOX")
        );
        assert!(!dest.path().join("INBOX").exists());
    }

    #[test]
    fn window_is_clamped_to_folder() {
        assert_eq!(
            vec![Range::new(1, 6)],
            resolve_window(&[Range::new(-100, 0)], 5).unwrap()
        );
        assert_eq!(
            vec![Range::new(3, 6)],
            resolve_window(&[Range::new(-3, 0)], 5).unwrap()
        );
        assert_eq!(
            vec![Range::new(2, 6)],
            resolve_window(&[Range::new(2, 50)], 5).unwrap()
        );
        assert!(resolve_window(&[Range::new(7, 9)], 5).is_err());
    }
}
