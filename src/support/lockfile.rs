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

//! Advisory cross-process locks with a timeout.
//!
//! `flock(2)` has no timed variant, so acquisition happens on a background
//! thread while the caller waits on a channel. If the wait times out, that
//! thread is abandoned: it stays blocked in `flock` until the holder lets go,
//! at which point it notices nobody is listening and drops the lock again.

use std::fs;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};
use log::{debug, warn};
use nix::fcntl::{flock, FlockArg};

use super::error::Error;
use super::file_ops;

/// A held advisory lock. Released on `release()` or drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    file: Option<fs::File>,
}

impl LockGuard {
    /// Release the lock. Calling this more than once is harmless.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = flock(file.as_raw_fd(), FlockArg::Unlock) {
                warn!("Failed to unlock {}: {}", self.path.display(), e);
            }
            debug!("Released lock on {}", self.path.display());
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Acquire an exclusive advisory lock on `path`, waiting at most `timeout`.
///
/// The parent directory is created (mode 0755) if it does not exist.
pub fn lock(
    path: impl AsRef<Path>,
    timeout: Duration,
) -> Result<LockGuard, Error> {
    let path = path.as_ref().to_owned();
    if let Some(parent) = path.parent() {
        file_ops::mkdir_p(parent, 0o755)?;
    }

    let (sender, receiver) = channel::bounded(1);
    let worker_path = path.clone();
    std::thread::spawn(move || {
        let result = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o644)
            .open(&worker_path)
            .map_err(Error::from)
            .and_then(|file| {
                flock(file.as_raw_fd(), FlockArg::LockExclusive)?;
                Ok(file)
            });

        // If the caller gave up, the send fails and the file (and with it the
        // lock) is dropped right here.
        let _ = sender.send(result);
    });

    match receiver.recv_timeout(timeout) {
        Ok(Ok(file)) => {
            debug!("Acquired lock on {}", path.display());
            Ok(LockGuard {
                path,
                file: Some(file),
            })
        }
        Ok(Err(e)) => Err(e),
        Err(RecvTimeoutError::Timeout) => {
            Err(Error::LockTimeout { path, timeout })
        }
        Err(RecvTimeoutError::Disconnected) => Err(Error::WorkerPanicked),
    }
}
