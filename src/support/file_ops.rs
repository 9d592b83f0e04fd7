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

//! Miscellaneous functions for working with files.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;

/// Write `data` into the file at `path`, atomically, replacing anything
/// already there.
///
/// The file is staged next to `path` so that the final rename never crosses
/// a file system boundary.
pub fn spit(path: impl AsRef<Path>, mode: u32, data: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tf = tempfile::NamedTempFile::new_in(dir)?;
    tf.as_file_mut().write_all(data)?;
    chmod(tf.path(), mode)?;
    tf.as_file_mut().sync_all()?;
    tf.persist(path)?;
    Ok(())
}

pub fn chmod(path: impl AsRef<Path>, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

/// `mkdir -p` with the given mode applied to every directory created.
pub fn mkdir_p(path: impl AsRef<Path>, mode: u32) -> io::Result<()> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
}

/// Create `path` as an empty file if it does not already exist.
///
/// An existing file is left untouched, including its mode.
pub fn touch(path: impl AsRef<Path>, mode: u32) -> io::Result<()> {
    let path = path.as_ref();
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
        .and_then(|_| chmod(path, mode))
        .ignore_already_exists()
}

pub trait IgnoreKinds {
    fn ignore_already_exists(self) -> Self;
}

impl<R: Default> IgnoreKinds for Result<R, io::Error> {
    fn ignore_already_exists(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::AlreadyExists == e.kind() => {
                Ok(R::default())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use std::os::unix::fs::MetadataExt;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn spit_replaces_content_and_sets_mode() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("state");

        spit(&path, 0o644, b"first").unwrap();
        spit(&path, 0o644, b"second").unwrap();

        assert_eq!(b"second".to_vec(), fs::read(&path).unwrap());
        assert_eq!(0o644, fs::metadata(&path).unwrap().mode() & 0o777);
        // Nothing left behind from staging
        assert_eq!(1, fs::read_dir(root.path()).unwrap().count());
    }

    #[test]
    fn touch_keeps_existing_content() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("f");

        touch(&path, 0o600).unwrap();
        assert_eq!(0, fs::metadata(&path).unwrap().len());
        fs::write(&path, b"data").unwrap();
        touch(&path, 0o600).unwrap();
        assert_eq!(b"data".to_vec(), fs::read(&path).unwrap());
    }

    #[test]
    fn mkdir_p_creates_nested_dirs() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("a/b/c");
        mkdir_p(&path, 0o755).unwrap();
        mkdir_p(&path, 0o755).unwrap();
        assert!(path.is_dir());
    }
}
