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

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use secstr::SecStr;
use structopt::StructOpt;

use crate::backup::download::{init_folders, resolve_folders, Backup};
use crate::imap::backend::{Backend, MAX_CACHE_BYTES};
use crate::imap::server;
use crate::maildir::layout::UniqueNamer;
use crate::remote::session::ImapConfig;
use crate::support::config::Config;
use crate::support::error::Error;
use crate::support::interrupt::Interrupter;
use crate::support::ranges::Range;
use crate::support::sysexits::*;

const PASSWORD_ENV: &str = "IGRAB_PASSWORD";

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Download new messages from the remote account into the backup.
    ///
    /// Only messages not already recorded in a folder's state file are
    /// fetched. Each folder is locked for the duration of its download, so
    /// concurrent runs against the same backup are safe.
    Download(DownloadSubcommand),
    /// List the remote folders the folder specs resolve to.
    List(AccountOptions),
    /// Create empty backups for the resolved folders without downloading.
    Init(AccountOptions),
    /// Serve an existing backup over IMAP on the loopback interface.
    ///
    /// The server is read-only; anything that would modify a mailbox is
    /// refused. It runs until interrupted.
    Serve(ServeSubcommand),
}

#[derive(StructOpt, Default)]
struct CommonOptions {
    /// The configuration file
    /// [default: ~/.config/igrab/igrab.toml]
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Log more. Repeat for even more.
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,

    /// Configure logging from this log4rs TOML file instead.
    #[structopt(long, parse(from_os_str))]
    log_config: Option<PathBuf>,

    /// Prompt for the password if it is not otherwise configured.
    #[structopt(long)]
    prompt_password: bool,
}

#[derive(StructOpt, Default)]
struct AccountOptions {
    #[structopt(flatten)]
    common: CommonOptions,

    /// Host name of the IMAP server.
    #[structopt(long)]
    server: Option<String>,

    /// Port of the IMAP server [default: 993]
    #[structopt(long)]
    port: Option<u16>,

    /// User name to log in with.
    #[structopt(long)]
    user: Option<String>,

    /// Connect without TLS. Only use this against a loopback server.
    #[structopt(long)]
    insecure: bool,

    /// The Maildir base directory.
    #[structopt(long, parse(from_os_str))]
    path: Option<PathBuf>,

    /// Number of folders to process concurrently [default: 1]
    #[structopt(long)]
    threads: Option<usize>,

    /// How long to wait for another process holding a folder's lock
    /// [default: 1000]
    #[structopt(long)]
    lock_timeout_ms: Option<u64>,

    /// A folder spec: a folder name, `_ALL_`, `_Gmail_`, or any of those
    /// prefixed with `-` to exclude. Applied left to right.
    #[structopt(
        long = "folder",
        number_of_values = 1,
        allow_hyphen_values = true
    )]
    folders: Vec<String>,
}

#[derive(StructOpt)]
struct DownloadSubcommand {
    #[structopt(flatten)]
    account: AccountOptions,

    /// Only download messages in this `start:end` range of sequence
    /// numbers. Negative values count back from the newest message.
    #[structopt(
        long = "window",
        number_of_values = 1,
        allow_hyphen_values = true
    )]
    windows: Vec<String>,
}

#[derive(StructOpt)]
struct ServeSubcommand {
    #[structopt(flatten)]
    common: CommonOptions,

    /// The Maildir base directory to serve.
    #[structopt(long, parse(from_os_str))]
    path: Option<PathBuf>,

    /// Port to listen on [default: 30912]
    #[structopt(long)]
    port: Option<u16>,

    /// The only user name the server accepts.
    #[structopt(long)]
    user: Option<String>,

    /// The only password the server accepts.
    #[structopt(long)]
    password: Option<String>,
}

impl Command {
    fn common(&self) -> &CommonOptions {
        match *self {
            Command::Download(ref c) => &c.account.common,
            Command::List(ref c) | Command::Init(ref c) => &c.common,
            Command::Serve(ref c) => &c.common,
        }
    }
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    let common = cmd.common();
    let config = match Config::discover(common.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error reading configuration: {}", e);
            EX_CONFIG.exit()
        }
    };

    init_log(common.verbose, common.log_config.as_deref());

    let result = match cmd {
        Command::Download(cmd) => download(cmd, config),
        Command::List(cmd) => list(cmd, config),
        Command::Init(cmd) => init(cmd, config),
        Command::Serve(cmd) => serve(cmd, config),
    };

    if let Err(e) = result {
        error!("{}", e);
        Sysexit::for_error(&e).exit();
    }
}

fn init_log(verbose: u8, log_config: Option<&Path>) {
    use log4rs::append::console::{ConsoleAppender, Target};
    use log4rs::config::{Appender, Root};
    use log4rs::encode::pattern::PatternEncoder;

    if let Some(log_config) = log_config {
        if let Err(e) = log4rs::init_file(
            log_config,
            log4rs::file::Deserializers::new(),
        ) {
            eprintln!(
                "Failed to initialise logging from '{}': {}",
                log_config.display(),
                e
            );
            EX_CONFIG.exit();
        }
        return;
    }

    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%dT%H:%M:%S%.3f)} [{l}] {m}{n}",
        )))
        .build();
    let config = log4rs::config::Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level));

    match config {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("Failed to initialise logging: {}", e);
                EX_SOFTWARE.exit();
            }
        }
        Err(e) => {
            eprintln!("Failed to initialise logging: {}", e);
            EX_SOFTWARE.exit();
        }
    }
}

fn usage(message: &str) -> ! {
    eprintln!("{}", message);
    EX_USAGE.exit()
}

/// Resolve the password from the first source which has one.
///
/// An explicit flag wins, then the environment, then the configuration
/// file, then an interactive prompt if allowed. The result may be empty;
/// the session refuses to dial in that case.
fn password(
    explicit: Option<String>,
    configured: Option<String>,
    prompt: bool,
) -> Result<SecStr, Error> {
    if let Some(password) = explicit {
        return Ok(SecStr::from(password));
    }

    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(SecStr::from(password));
    }

    if let Some(password) = configured {
        return Ok(SecStr::from(password));
    }

    if prompt {
        let password = rpassword::read_password_from_tty(Some("Password: "))?;
        return Ok(SecStr::from(password));
    }

    Ok(SecStr::from(String::new()))
}

/// Everything the account-level subcommands need, with the command line
/// applied over the configuration file.
struct Account {
    imap: ImapConfig,
    base: Option<PathBuf>,
    folders: Vec<String>,
    threads: usize,
    lock_timeout: Duration,
}

impl Account {
    fn resolve(opts: AccountOptions, config: Config) -> Result<Self, Error> {
        let Config {
            account: acct,
            backup,
            ..
        } = config;

        let server = opts.server.unwrap_or(acct.server);
        if server.is_empty() {
            usage("No IMAP server given; use --server or the config file");
        }

        let user = opts.user.unwrap_or(acct.user);
        if user.is_empty() {
            usage("No user name given; use --user or the config file");
        }

        let password =
            password(None, acct.password, opts.common.prompt_password)?;

        Ok(Account {
            imap: ImapConfig {
                server,
                port: opts.port.unwrap_or(acct.port),
                user,
                password,
                insecure: opts.insecure || acct.insecure,
            },
            base: opts.path.or(backup.path),
            folders: if opts.folders.is_empty() {
                backup.folders
            } else {
                opts.folders
            },
            threads: opts.threads.unwrap_or(backup.threads).max(1),
            lock_timeout: Duration::from_millis(
                opts.lock_timeout_ms.unwrap_or(backup.lock_timeout_ms),
            ),
        })
    }

    fn base(&self) -> &Path {
        match self.base {
            Some(ref base) => base,
            None => {
                usage("No backup path given; use --path or the config file")
            }
        }
    }
}

fn download(cmd: DownloadSubcommand, config: Config) -> Result<(), Error> {
    let configured_windows = config.backup.window.clone();
    let account = Account::resolve(cmd.account, config)?;

    let window = if cmd.windows.is_empty() {
        configured_windows
    } else {
        cmd.windows
    }
    .iter()
    .map(|w| Range::from_str(w))
    .collect::<Result<Vec<_>, _>>()?;

    let namer = UniqueNamer::new()?;
    let interrupter = Interrupter::for_process();
    let backup = Backup {
        cfg: &account.imap,
        base: account.base(),
        threads: account.threads,
        lock_timeout: account.lock_timeout,
        window: &window,
        interrupter: &interrupter,
        namer: &namer,
    };

    backup.run(&account.folders)?;
    info!("Backup complete");
    Ok(())
}

fn list(cmd: AccountOptions, config: Config) -> Result<(), Error> {
    let account = Account::resolve(cmd, config)?;
    for folder in resolve_folders(&account.imap, &account.folders)? {
        println!("{}", folder);
    }
    Ok(())
}

fn init(cmd: AccountOptions, config: Config) -> Result<(), Error> {
    let account = Account::resolve(cmd, config)?;
    let folders = resolve_folders(&account.imap, &account.folders)?;
    init_folders(&account.imap, account.base(), &folders)?;
    info!("Initialised {} folders", folders.len());
    Ok(())
}

fn serve(cmd: ServeSubcommand, config: Config) -> Result<(), Error> {
    let base = match cmd.path.or(config.backup.path) {
        Some(base) => base,
        None => usage("No backup path given; use --path or the config file"),
    };

    let user = cmd.user.unwrap_or(config.serve.user);
    if user.is_empty() {
        usage("No user name given; use --user or the config file");
    }

    let password = password(
        cmd.password,
        config.serve.password,
        cmd.common.prompt_password,
    )?;
    if password.unsecure().is_empty() {
        return Err(Error::CredentialsMissing);
    }

    let port = cmd.port.unwrap_or(config.serve.port);
    let backend = Backend::load(&base, &user, password, *MAX_CACHE_BYTES)?;

    let interrupter = Interrupter::for_process();
    let _registration = interrupter.register()?;
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    server::serve(listener, Arc::new(backend), &interrupter)
}
