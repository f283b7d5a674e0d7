//! Serialization and deserialization structures for the OAuth files.
//! - `credentials.json`: OAuth 2.0 client credentials from Google Cloud Console
//! - `token.json`: the access and refresh tokens that we persist between runs

use crate::auth::endpoint::TokenGrant;
use crate::error::{AuthError, AuthResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;

/// Google's OAuth authorization endpoint, used when the client secret file does not name one.
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";

/// Google's OAuth token endpoint, used when the client secret file does not name one.
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// A token that expires within this window is treated as already expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Lifetime assumed for an access token when the token endpoint does not report one.
const DEFAULT_LIFETIME_SECS: i64 = 3600;

/// Represents the structure of the `credentials.json` file downloaded from Google Cloud Console.
///
/// Desktop clients are wrapped in an "installed" object, web clients in a "web" object. Both carry
/// the same fields.
///
/// Example:
/// ```json
/// {
///   "installed": {
///     "client_id": "YOUR_CLIENT_ID.apps.googleusercontent.com",
///     "client_secret": "YOUR_CLIENT_SECRET",
///     "redirect_uris": ["http://localhost"],
///     "auth_uri": "https://accounts.google.com/o/oauth2/auth",
///     "token_uri": "https://oauth2.googleapis.com/token"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum SecretFile {
    Installed(ClientCredentials),
    Web(ClientCredentials),
}

impl SecretFile {
    /// Loads the OAuth client credentials. Any problem, including a missing file, is reported as
    /// `AuthError::MissingClientDescriptor` because the user fixes all of them the same way.
    pub(crate) async fn load(path: &Path) -> AuthResult<SecretFile> {
        let missing = |reason: String| AuthError::MissingClientDescriptor {
            path: path.to_path_buf(),
            reason,
        };
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => missing("the file does not exist".to_string()),
                _ => missing(e.to_string()),
            })?;
        let secret: SecretFile =
            serde_json::from_str(&content).map_err(|e| missing(format!("invalid JSON, {e}")))?;
        if secret.client_id().is_empty() {
            return Err(missing("client_id is empty".to_string()));
        }
        Ok(secret)
    }

    fn credentials(&self) -> &ClientCredentials {
        match self {
            SecretFile::Installed(c) | SecretFile::Web(c) => c,
        }
    }

    pub(crate) fn client_id(&self) -> &str {
        &self.credentials().client_id
    }

    pub(crate) fn auth_uri(&self) -> &str {
        &self.credentials().auth_uri
    }

    /// The identifiers needed to talk to the token endpoint.
    pub(crate) fn client(&self) -> ClientMetadata {
        let c = self.credentials();
        ClientMetadata {
            client_id: c.client_id.clone(),
            client_secret: c.client_secret.clone(),
            token_uri: c.token_uri.clone(),
        }
    }

    /// Whether one of the registered redirect URIs would accept `http://localhost:{port}/`.
    /// Google treats a port-less loopback URI as matching any port.
    pub(crate) fn accepts_redirect(&self, port: u16) -> bool {
        self.credentials()
            .redirect_uris
            .iter()
            .any(|uri| is_loopback_redirect(uri, port))
    }
}

fn is_loopback_redirect(uri: &str, port: u16) -> bool {
    let uri = uri.trim_end_matches('/');
    ["http://localhost", "http://127.0.0.1"]
        .iter()
        .any(|host| uri == *host || uri == format!("{host}:{port}"))
}

/// The actual OAuth credentials nested within the `credentials.json` file.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub(crate) struct ClientCredentials {
    client_id: String,

    client_secret: String,

    #[serde(default)]
    redirect_uris: Vec<String>,

    #[serde(default = "default_auth_uri")]
    auth_uri: String,

    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// What the token endpoint needs to know about the application to refresh or exchange a token.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct ClientMetadata {
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) token_uri: String,
}

/// This is how we save the token information that we receive from Google OAuth. The layout is the
/// "authorized user" JSON that Google's client libraries read, so a downstream agent can load the
/// file as-is.
///
/// Example:
/// ```json
/// {
///   "token": "ya29.a0Af...",
///   "refresh_token": "1//0g...",
///   "token_uri": "https://oauth2.googleapis.com/token",
///   "client_id": "YOUR_CLIENT_ID.apps.googleusercontent.com",
///   "client_secret": "YOUR_CLIENT_SECRET",
///   "scopes": ["https://www.googleapis.com/auth/calendar"],
///   "expiry": "2026-10-19T18:04:11.123456Z"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TokenFile {
    #[serde(rename = "token")]
    access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,

    token_uri: String,

    client_id: String,

    client_secret: String,

    scopes: Vec<String>,

    expiry: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    universe_domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    account: Option<String>,
}

impl TokenFile {
    pub(crate) fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        client: ClientMetadata,
        scopes: Vec<String>,
        expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            token_uri: client.token_uri,
            client_id: client.client_id,
            client_secret: client.client_secret,
            scopes,
            expiry,
            universe_domain: None,
            account: None,
        }
    }

    /// Builds a token from a freshly issued grant. If the provider did not say which scopes it
    /// granted we take it to have granted the `requested` ones.
    pub(crate) fn from_grant(
        grant: TokenGrant,
        client: ClientMetadata,
        requested: &[String],
        now: DateTime<Utc>,
    ) -> Self {
        let expiry = expiry_from(&grant, now);
        let scopes = grant.scopes.unwrap_or_else(|| requested.to_vec());
        Self::new(grant.access_token, grant.refresh_token, client, scopes, expiry)
    }

    /// Applies the result of a refresh. The previous refresh token and scopes are kept when the
    /// provider does not send new ones.
    pub(crate) fn apply_refresh(&mut self, grant: TokenGrant, now: DateTime<Utc>) {
        self.expiry = expiry_from(&grant, now);
        self.access_token = grant.access_token;
        if let Some(rt) = grant.refresh_token {
            self.refresh_token = Some(rt);
        }
        if let Some(scopes) = grant.scopes {
            self.scopes = scopes;
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub(crate) fn client(&self) -> ClientMetadata {
        ClientMetadata {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            token_uri: self.token_uri.clone(),
        }
    }

    /// Check if the token is expired or will expire within the skew window.
    pub(crate) fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now + Duration::seconds(EXPIRY_SKEW_SECS)
    }

    /// Whether the granted scopes are a superset of `required`.
    pub(crate) fn covers(&self, required: &[String]) -> bool {
        self.missing_scopes(required).is_empty()
    }

    /// The scopes in `required` that this token was not granted, in the order given.
    pub(crate) fn missing_scopes(&self, required: &[String]) -> Vec<String> {
        let granted: HashSet<&str> = self.scopes.iter().map(|s| s.as_str()).collect();
        required
            .iter()
            .filter(|s| !granted.contains(s.as_str()))
            .cloned()
            .collect()
    }

    /// A token is valid when it has all the `required` scopes and has not expired.
    pub(crate) fn is_valid(&self, required: &[String], now: DateTime<Utc>) -> bool {
        self.covers(required) && !self.is_expired(now)
    }
}

fn expiry_from(grant: &TokenGrant, now: DateTime<Utc>) -> DateTime<Utc> {
    let lifetime = grant
        .expires_in
        .and_then(|d| Duration::from_std(d).ok())
        .unwrap_or_else(|| Duration::seconds(DEFAULT_LIFETIME_SECS));
    now + lifetime
}
