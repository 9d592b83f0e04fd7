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

//! Maildir directory layout, unique file names, and atomic delivery.
//!
//! See <https://cr.yp.to/proto/maildir.html>. Deliveries are written into
//! `tmp/` and then renamed into `new/`, so a reader never sees a partial
//! message. Both directories live under the same folder, so the rename never
//! crosses a file system.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};
use rand::{rngs::OsRng, Rng};

use crate::support::error::Error;
use crate::support::file_ops;
use crate::support::safe_name::is_safe_name;

pub const NEW: &str = "new";
pub const CUR: &str = "cur";
pub const TMP: &str = "tmp";

pub const DIR_MODE: u32 = 0o755;
pub const STATE_MODE: u32 = 0o644;
pub const MESSAGE_MODE: u32 = 0o600;

/// Whether `folder_path` has all three Maildir subdirectories.
pub fn is_maildir(folder_path: impl AsRef<Path>) -> bool {
    let folder_path = folder_path.as_ref();
    [NEW, CUR, TMP]
        .iter()
        .all(|sub| folder_path.join(sub).is_dir())
}

/// A single folder of a Maildir backup: `base/folder`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaildirPath {
    base: PathBuf,
    folder: String,
}

impl MaildirPath {
    /// `folder` must be usable as a single path element.
    pub fn new(base: impl Into<PathBuf>, folder: &str) -> Result<Self, Error> {
        if !is_safe_name(folder) {
            return Err(Error::UnsafeName(folder.to_owned()));
        }

        Ok(MaildirPath {
            base: base.into(),
            folder: folder.to_owned(),
        })
    }

    pub fn folder_path(&self) -> PathBuf {
        self.base.join(&self.folder)
    }

    pub fn is_maildir(&self) -> bool {
        is_maildir(self.folder_path())
    }

    /// Whether this is a Maildir and `oldmail` (its state file) exists.
    pub fn is_valid(&self, oldmail: &Path) -> bool {
        self.is_maildir() && oldmail.is_file()
    }

    /// Whether neither the subdirectories nor `oldmail` exist, i.e., this
    /// folder has never been backed up.
    pub fn is_absent(&self, oldmail: &Path) -> bool {
        let folder_path = self.folder_path();
        !oldmail.exists()
            && [NEW, CUR, TMP]
                .iter()
                .all(|sub| !folder_path.join(sub).exists())
    }

    /// Create the subdirectories and an empty state file at `oldmail`.
    ///
    /// Anything which already exists is left alone.
    pub fn create(&self, oldmail: &Path) -> Result<(), Error> {
        let folder_path = self.folder_path();
        for sub in &[NEW, CUR, TMP] {
            file_ops::mkdir_p(folder_path.join(sub), DIR_MODE)?;
        }
        file_ops::touch(oldmail, STATE_MODE)?;
        info!("Initialised maildir {}", folder_path.display());
        Ok(())
    }
}

/// Generates Maildir file names which are unique within this host.
///
/// The format is `<secs>.M<usec>P<pid>Q<counter>R<random>.<hostname>`. The
/// counter alone guarantees uniqueness within the process; the rest guards
/// against other processes and a recycled PID.
#[derive(Debug)]
pub struct UniqueNamer {
    counter: AtomicU64,
    pid: u32,
    hostname: String,
}

impl UniqueNamer {
    /// Create a namer for the current host.
    pub fn new() -> Result<Self, Error> {
        let mut buf = [0u8; 256];
        let hostname = nix::unistd::gethostname(&mut buf)?
            .to_string_lossy()
            .into_owned();
        Self::with_hostname(&hostname)
    }

    /// Create a namer for the given host name.
    ///
    /// `/` and `:` cannot appear in a file name element, so they are replaced
    /// by their octal escapes. Spaces are rejected outright.
    pub fn with_hostname(hostname: &str) -> Result<Self, Error> {
        if hostname.contains(' ') {
            return Err(Error::BadHostname(hostname.to_owned()));
        }

        Ok(UniqueNamer {
            counter: AtomicU64::new(0),
            pid: nix::unistd::getpid().as_raw() as u32,
            hostname: hostname.replace('/', "\\057").replace(':', "\\072"),
        })
    }

    pub fn next_name(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        format!(
            "{}.M{}P{}Q{}R{:016x}.{}",
            now.as_secs(),
            now.subsec_micros(),
            self.pid,
            counter,
            OsRng.gen::<u64>(),
            self.hostname
        )
    }
}

/// Removes the file at the contained path when dropped, unless disarmed.
struct UnlinkOnError(Option<PathBuf>);

impl Drop for UnlinkOnError {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let _ = fs::remove_file(path);
        }
    }
}

/// Deliver `data` into the Maildir at `folder_path`.
///
/// The message is written to `tmp/` with mode 0600, synced, and renamed into
/// `new/`. Returns the final path. On failure nothing is left in `tmp/`.
pub fn deliver(
    folder_path: &Path,
    namer: &UniqueNamer,
    data: &[u8],
) -> Result<PathBuf, Error> {
    let name = namer.next_name();
    let tmp_path = folder_path.join(TMP).join(&name);
    let new_path = folder_path.join(NEW).join(&name);

    let wrap = |source: io::Error| Error::DeliveryIo {
        path: new_path.clone(),
        source,
    };

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(MESSAGE_MODE)
        .open(&tmp_path)
        .map_err(wrap)?;
    let mut guard = UnlinkOnError(Some(tmp_path.clone()));

    file.write_all(data).map_err(wrap)?;
    file.sync_all().map_err(wrap)?;
    drop(file);

    fs::rename(&tmp_path, &new_path).map_err(wrap)?;
    guard.0 = None;

    debug!("Delivered {} bytes to {}", data.len(), new_path.display());
    Ok(new_path)
}
