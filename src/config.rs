//! Configuration file handling for gauth.
//!
//! The configuration file is stored at `$GAUTH_HOME/config.json` and contains the scopes to
//! request, the redirect port registered with Google, the consent timeout and the locations of the
//! client secret and token files. Every setting has a default, so the file is optional.

use crate::{utils, Result};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const APP_NAME: &str = "gauth";
const CONFIG_VERSION: u8 = 1;
const CLIENT_SECRET_JSON: &str = "credentials.json";
const TOKEN_JSON: &str = "token.json";
const CONFIG_JSON: &str = "config.json";
const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/calendar";
const DEFAULT_REDIRECT_PORT: u16 = 8080;
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$GAUTH_HOME` and from there it loads `$GAUTH_HOME/config.json`. Settings given on
/// the command line are layered on top with `with_overrides`.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
    overrides: Overrides,
}

/// Settings taken from the command line. Paths are used as given, i.e. relative to the current
/// directory.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Overrides {
    pub client_secret_path: Option<PathBuf>,
    pub token_path: Option<PathBuf>,
    /// Replaces the configured scopes when non-empty.
    pub scopes: Vec<String>,
    pub redirect_port: Option<u16>,
    pub timeout_secs: Option<u64>,
    pub no_browser: bool,
    pub no_force_consent: bool,
}

impl Config {
    /// Creates the home directory and:
    /// - Copies `secret_file` into its default location in the home directory
    /// - Writes an initial `config.json` using `scopes` and `redirect_port` along with defaults
    ///
    /// # Arguments
    /// - `dir` - The directory that will become the home directory, e.g. `$HOME/.gauth`
    /// - `secret_file` - The OAuth 2.0 client credentials JSON downloaded from Google Cloud Console.
    /// - `scopes` - The scopes to request, the default scope is used if this is empty.
    /// - `redirect_port` - The port of the redirect URI registered for the client.
    ///
    /// # Errors
    /// - Returns an error if any file operations fail.
    pub async fn create(
        dir: impl Into<PathBuf>,
        secret_file: &Path,
        scopes: Vec<String>,
        redirect_port: Option<u16>,
    ) -> Result<Self> {
        let maybe_relative = dir.into();
        utils::make_dir(&maybe_relative)
            .await
            .context("Unable to create the gauth home directory")?;
        let root = utils::canonicalize(&maybe_relative).await?;

        // Make sure the secret parses before we copy it anywhere
        let _ = utils::deserialize::<serde_json::Value>(secret_file)
            .await
            .context("The client secret file is not valid JSON")?;
        let destination = root.join(CLIENT_SECRET_JSON);
        let same_file = destination.is_file()
            && utils::canonicalize(secret_file).await? == utils::canonicalize(&destination).await?;
        if !same_file {
            utils::copy(secret_file, &destination).await?;
        }

        let mut config_file = ConfigFile::default();
        if !scopes.is_empty() {
            config_file.scopes = scopes;
        }
        if let Some(port) = redirect_port {
            config_file.redirect_port = port;
        }
        let config_path = root.join(CONFIG_JSON);
        config_file.save(&config_path).await?;

        Ok(Self {
            root,
            config_path,
            config_file,
            overrides: Overrides::default(),
        })
    }

    /// Loads `$GAUTH_HOME/config.json`. When the file does not exist the defaults are used.
    pub async fn load(home: impl Into<PathBuf>) -> Result<Self> {
        let root = home.into();
        let config_path = root.join(CONFIG_JSON);
        let config_file = if config_path.is_file() {
            ConfigFile::load(&config_path).await?
        } else {
            debug!(
                "No config file at '{}', using defaults",
                config_path.display()
            );
            ConfigFile::default()
        };
        if config_file.scopes.is_empty() {
            bail!(
                "The config file '{}' does not list any scopes",
                config_path.display()
            );
        }
        Ok(Self {
            root,
            config_path,
            config_file,
            overrides: Overrides::default(),
        })
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Returns the `client_secret_path`, resolving a configured relative path against the home
    /// directory.
    pub fn client_secret_path(&self) -> PathBuf {
        match &self.overrides.client_secret_path {
            Some(p) => p.clone(),
            None => self.resolve_home_path(self.config_file.client_secret_path()),
        }
    }

    /// Returns the `token_path`, resolving a configured relative path against the home directory.
    pub fn token_path(&self) -> PathBuf {
        match &self.overrides.token_path {
            Some(p) => p.clone(),
            None => self.resolve_home_path(self.config_file.token_path()),
        }
    }

    pub fn scopes(&self) -> &[String] {
        if self.overrides.scopes.is_empty() {
            &self.config_file.scopes
        } else {
            &self.overrides.scopes
        }
    }

    pub fn redirect_port(&self) -> u16 {
        self.overrides
            .redirect_port
            .unwrap_or(self.config_file.redirect_port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.overrides
                .timeout_secs
                .unwrap_or(self.config_file.timeout_secs),
        )
    }

    pub fn force_consent(&self) -> bool {
        self.config_file.force_consent && !self.overrides.no_force_consent
    }

    pub fn open_browser(&self) -> bool {
        self.config_file.open_browser && !self.overrides.no_browser
    }

    /// Checks if `p` is relative, and if so, resolves it. Returns it unchanged if it is absolute.
    fn resolve_home_path(&self, p: PathBuf) -> PathBuf {
        if p.is_absolute() {
            return p;
        }
        self.root.join(p)
    }
}

/// Represents the serialization and deserialization format of the configuration file.
///
/// Example configuration:
/// ```json
/// {
///   "app_name": "gauth",
///   "config_version": 1,
///   "scopes": ["https://www.googleapis.com/auth/calendar"],
///   "redirect_port": 8080,
///   "timeout_secs": 300,
///   "force_consent": true,
///   "open_browser": true,
///   "client_secret_path": "credentials.json",
///   "token_path": "token.json"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
struct ConfigFile {
    /// Application name, should always be "gauth"
    app_name: String,

    /// Configuration file version
    config_version: u8,

    /// The scopes that the token must grant
    #[serde(default = "default_scopes")]
    scopes: Vec<String>,

    /// The local port for the OAuth redirect, `http://localhost:{port}/` must be registered with
    /// Google as a redirect URI
    #[serde(default = "default_redirect_port")]
    redirect_port: u16,

    /// How long to wait for the user to finish in the browser
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,

    /// Whether to always show Google's consent screen so that a refresh token is issued
    #[serde(default = "default_true")]
    force_consent: bool,

    /// Whether to try to open the authorization URL in a browser
    #[serde(default = "default_true")]
    open_browser: bool,

    /// Path to the OAuth 2.0 client credentials file (optional, relative to the home dir or absolute)
    /// Defaults to $GAUTH_HOME/credentials.json if not specified
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret_path: Option<PathBuf>,

    /// Path to the OAuth token file (optional, relative to the home dir or absolute)
    /// Defaults to $GAUTH_HOME/token.json if not specified
    #[serde(skip_serializing_if = "Option::is_none")]
    token_path: Option<PathBuf>,
}

fn default_scopes() -> Vec<String> {
    vec![DEFAULT_SCOPE.to_string()]
}

fn default_redirect_port() -> u16 {
    DEFAULT_REDIRECT_PORT
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            scopes: default_scopes(),
            redirect_port: DEFAULT_REDIRECT_PORT,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            force_consent: true,
            open_browser: true,
            client_secret_path: None,
            token_path: None,
        }
    }
}

impl ConfigFile {
    /// Loads a ConfigFile asynchronously from the specified path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: ConfigFile = utils::deserialize(path)
            .await
            .with_context(|| format!("Failed to load config file at {}", path.display()))?;

        // Validate app_name
        anyhow::ensure!(
            config.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            config.app_name
        );

        Ok(config)
    }

    /// Saves the ConfigFile to the specified path.
    async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let p = path.as_ref();
        let data = serde_json::to_string_pretty(self).context("Unable to serialize config")?;
        utils::write(p, data)
            .await
            .context("Unable to write config file")
    }

    /// Gets the client secret path, relative paths are relative to the home directory.
    fn client_secret_path(&self) -> PathBuf {
        self.client_secret_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(CLIENT_SECRET_JSON))
    }

    /// Gets the token path, relative paths are relative to the home directory.
    fn token_path(&self) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(TOKEN_JSON))
    }
}
