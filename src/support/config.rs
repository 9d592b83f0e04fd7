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

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::error::Error;

/// The configuration file, typically `~/.config/igrab/igrab.toml`.
///
/// Every value can be overridden on the command line, so every section is
/// optional.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct Config {
    /// The remote IMAP account to back up.
    #[serde(default)]
    pub account: AccountConfig,

    /// Where and what to back up.
    #[serde(default)]
    pub backup: BackupConfig,

    /// The read-only IMAP server over an existing backup.
    #[serde(default)]
    pub serve: ServeConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub server: String,
    pub port: u16,
    pub user: String,
    /// If unset, the password comes from `IGRAB_PASSWORD` or a prompt.
    pub password: Option<String>,
    /// Use a plain TCP connection. Only sensible against a server on the
    /// loopback interface.
    pub insecure: bool,
}

impl Default for AccountConfig {
    fn default() -> Self {
        AccountConfig {
            server: String::new(),
            port: 993,
            user: String::new(),
            password: None,
            insecure: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// The Maildir base directory. Each folder becomes a subdirectory.
    pub path: Option<PathBuf>,
    /// Folder specs, expanded left to right against the server's folders.
    pub folders: Vec<String>,
    /// How many folders to download concurrently.
    pub threads: usize,
    /// How long to wait for another process to let go of a folder.
    pub lock_timeout_ms: u64,
    /// Restrict downloads to these sequence ranges (`start:end`, negative
    /// counts back from the newest message).
    pub window: Vec<String>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            path: None,
            folders: vec!["_ALL_".to_owned()],
            threads: 1,
            lock_timeout_ms: 1000,
            window: vec![],
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
}

impl Default for ServeConfig {
    fn default() -> Self {
        ServeConfig {
            port: 30912,
            user: String::new(),
            password: None,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let raw = fs::read(path)?;
        Ok(toml::from_slice(&raw)?)
    }

    /// Load the file at `explicit` if given; otherwise the default location
    /// if it exists; otherwise the defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, Error> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match default_path() {
            Some(path) if path.is_file() => Self::load(path),
            _ => Ok(Config::default()),
        }
    }
}

fn default_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join(".config").join("igrab").join("igrab.toml"))
}
