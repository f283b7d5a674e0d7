//! These structs provide the CLI interface for the gauth CLI.

use crate::Overrides;
use clap::{Parser, Subcommand};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// gauth: Obtain and keep a valid Google OAuth token for a local program.
///
/// The first time you run `gauth auth` it opens Google's consent page in your browser, catches the
/// redirect on a local port and saves the resulting token. Later runs reuse the saved token,
/// refresh it when it has expired, and only go back to the browser when that is impossible.
///
/// You will need an OAuth client for a Desktop application, downloaded from the Google Cloud
/// Console as a JSON file, with `http://localhost:8080/` (or the port you choose) registered as a
/// redirect URI.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the home directory and initialize the configuration files.
    ///
    /// This copies your downloaded OAuth client JSON into the home directory and writes a
    /// config.json with the scopes and redirect port you choose. Running it is optional; `gauth
    /// auth` works with defaults and a --client-secret path.
    Init(InitArgs),
    /// Produce a valid token: reuse it, refresh it, or ask for consent in the browser.
    Auth(AuthArgs),
    /// Delete the saved token so that the next `gauth auth` asks for consent again.
    Clear,
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG. See the tracing-subscriber crate for instructions.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where gauth configuration and tokens are held. Defaults to ~/.gauth
    #[arg(long, env = "GAUTH_HOME", default_value_t = default_gauth_home())]
    home: DisplayPath,
}

impl Common {
    pub fn new(log_level: LevelFilter, home: PathBuf) -> Self {
        Self {
            log_level,
            home: home.into(),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn home(&self) -> &DisplayPath {
        &self.home
    }
}

/// (Not shown): Args for the `gauth init` command.
#[derive(Debug, Parser, Clone)]
pub struct InitArgs {
    /// The path to your downloaded OAuth client credentials. This file will be copied to
    /// $GAUTH_HOME/credentials.json.
    #[arg(long)]
    client_secret: PathBuf,

    /// A scope to request. Repeat the flag to request several. Defaults to the Google Calendar
    /// scope.
    #[arg(long = "scope")]
    scopes: Vec<String>,

    /// The local port of the redirect URI registered for your OAuth client. Defaults to 8080.
    #[arg(long)]
    port: Option<u16>,
}

impl InitArgs {
    pub fn new(client_secret: impl Into<PathBuf>, scopes: Vec<String>, port: Option<u16>) -> Self {
        Self {
            client_secret: client_secret.into(),
            scopes,
            port,
        }
    }

    pub fn client_secret(&self) -> &Path {
        &self.client_secret
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

/// (Not shown): Args for the `gauth auth` command.
#[derive(Debug, Parser, Clone, Default)]
pub struct AuthArgs {
    /// Check the saved token, refreshing it if needed, but never open a browser. Fails if consent
    /// would be required.
    #[arg(long)]
    verify: bool,

    /// The OAuth client credentials file, overrides the configured path.
    #[arg(long)]
    client_secret: Option<PathBuf>,

    /// Where to keep the token, overrides the configured path.
    #[arg(long)]
    token: Option<PathBuf>,

    /// A scope the token must grant. Repeat the flag for several. Replaces the configured scopes.
    #[arg(long = "scope")]
    scopes: Vec<String>,

    /// The local port to listen on for the OAuth redirect.
    #[arg(long)]
    port: Option<u16>,

    /// How many seconds to wait for the browser to return.
    #[arg(long)]
    timeout: Option<u64>,

    /// Print the authorization URL instead of opening a browser.
    #[arg(long)]
    no_browser: bool,

    /// Do not add prompt=consent to the authorization URL. Google may then omit the refresh token.
    #[arg(long)]
    no_force_consent: bool,
}

impl AuthArgs {
    pub fn new(verify: bool) -> Self {
        Self {
            verify,
            ..Self::default()
        }
    }

    pub fn verify(&self) -> bool {
        self.verify
    }

    /// The settings from this command line that take precedence over `config.json`.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            client_secret_path: self.client_secret.clone(),
            token_path: self.token.clone(),
            scopes: self.scopes.clone(),
            redirect_port: self.port,
            timeout_secs: self.timeout,
            no_browser: self.no_browser,
            no_force_consent: self.no_force_consent,
        }
    }
}

fn default_gauth_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join(".gauth"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --home or GAUTH_HOME instead of relying on the default \
                gauth home directory. If you continue using the program right now, you may have \
                problems!",
            );
            PathBuf::from(".gauth")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}
