//! Authentication command handlers for the OAuth flow.
//!
//! This module implements the CLI commands for:
//! - `gauth auth` - Reuse, refresh or, failing both, run the OAuth consent flow
//! - `gauth auth --verify` - Reuse or refresh only, never open a browser

use crate::auth::{
    Authorizer, AuthorizerSettings, ConsolePresenter, OAuthEndpoint, Resolver, TokenEndpoint,
    TokenStore,
};
use crate::commands::Out;
use crate::error::AuthError;
use crate::{Config, Result, Source};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What `gauth auth` produced. The token itself is left out so that it is never printed.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSummary {
    source: Source,
    token_path: PathBuf,
    expiry: DateTime<Utc>,
    scopes: Vec<String>,
    has_refresh_token: bool,
}

impl AuthSummary {
    pub fn source(&self) -> Source {
        self.source
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }
}

/// Handles the `gauth auth` command
///
/// This is the ONLY command that may open a browser for OAuth authentication, and it only does so
/// when the saved token can neither be reused nor refreshed.
///
/// # Arguments
/// * `config` - Reference to the Config struct
///
/// # Errors
/// Returns an error if the client secret file is missing, the consent flow fails, or the token
/// cannot be saved.
pub async fn auth(config: &Config) -> Result<Out<AuthSummary>> {
    let endpoint = OAuthEndpoint::new().map_err(AuthError::InvalidEndpoint)?;
    let authorizer = Authorizer::new(
        AuthorizerSettings {
            port: config.redirect_port(),
            timeout: config.timeout(),
            force_consent: config.force_consent(),
        },
        Box::new(ConsolePresenter::new(config.open_browser())),
    );
    resolve(config, Box::new(endpoint), Some(authorizer))
        .await
        .context("Unable to obtain a valid OAuth token")
}

/// Handles the `gauth auth --verify` command
///
/// This command NEVER opens a browser or starts the redirect listener. A saved token is reused if
/// it is still valid and refreshed if it is not. If neither works the command fails with a
/// message telling the user to run `gauth auth`.
///
/// # Arguments
/// * `config` - Reference to the Config struct
///
/// # Errors
/// Returns an error if no usable token exists or if it cannot be refreshed.
pub async fn auth_verify(config: &Config) -> Result<Out<AuthSummary>> {
    let endpoint = OAuthEndpoint::new().map_err(AuthError::InvalidEndpoint)?;
    resolve(config, Box::new(endpoint), None)
        .await
        .context("Unable to verify the saved OAuth token")
}

async fn resolve(
    config: &Config,
    endpoint: Box<dyn TokenEndpoint>,
    authorizer: Option<Authorizer>,
) -> Result<Out<AuthSummary>> {
    let token_path = config.token_path();
    debug!(
        "Resolving a token at '{}' with client secret '{}'",
        token_path.display(),
        config.client_secret_path().display()
    );
    let resolver = Resolver::new(
        TokenStore::new(&token_path),
        config.client_secret_path(),
        config.scopes().to_vec(),
        endpoint,
        authorizer,
    );
    let resolution = resolver.resolve().await?;
    let token = resolution.token;

    let message = match resolution.source {
        Source::Reused => format!("Your OAuth token is valid until {}", token.expiry()),
        Source::Refreshed => format!(
            "Your OAuth token was refreshed and is valid until {}",
            token.expiry()
        ),
        Source::Authorized => format!(
            "Authorization succeeded, the token was saved to {}",
            token_path.display()
        ),
    };
    let summary = AuthSummary {
        source: resolution.source,
        token_path,
        expiry: token.expiry(),
        scopes: token.scopes().to_vec(),
        has_refresh_token: token.refresh_token().is_some(),
    };
    Ok(Out::new(message, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{SecretFile, TokenFile};
    use crate::test::{secret_file, FakeEndpoint};
    use crate::Overrides;
    use chrono::Duration;
    use tempfile::TempDir;

    async fn config(dir: &TempDir) -> Config {
        let secret = secret_file(dir.path());
        Config::load(dir.path())
            .await
            .unwrap()
            .with_overrides(Overrides {
                client_secret_path: Some(secret),
                ..Overrides::default()
            })
    }

    async fn save_token(config: &Config, expiry: DateTime<Utc>) {
        let secret = SecretFile::load(&config.client_secret_path()).await.unwrap();
        let token = TokenFile::new(
            "saved-access",
            Some("saved-refresh".to_string()),
            secret.client(),
            config.scopes().to_vec(),
            expiry,
        );
        TokenStore::new(config.token_path())
            .save(&token)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_reuses_valid_token() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir).await;
        save_token(&config, Utc::now() + Duration::hours(1)).await;

        let out = auth_verify(&config).await.unwrap();
        let summary = out.structure().unwrap();
        assert_eq!(Source::Reused, summary.source());
        assert_eq!(config.token_path().as_path(), summary.token_path());
        assert!(out.message().contains("valid until"));
        assert!(!serde_json::to_string(summary)
            .unwrap()
            .contains("saved-access"));
    }

    #[tokio::test]
    async fn test_verify_without_token_requires_interaction() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir).await;

        let err = auth_verify(&config).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthError>(),
            Some(AuthError::InteractionRequired)
        ));
        assert!(!config.token_path().exists());
    }

    #[tokio::test]
    async fn test_resolve_refreshes_expired_token() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir).await;
        save_token(&config, Utc::now() - Duration::hours(1)).await;
        let endpoint = FakeEndpoint::new();

        let out = resolve(&config, Box::new(endpoint.clone()), None)
            .await
            .unwrap();
        assert_eq!(Source::Refreshed, out.structure().unwrap().source());
        assert_eq!(1, endpoint.refresh_calls());
        assert_eq!(
            Some("saved-refresh".to_string()),
            endpoint.last_refresh_token()
        );
    }
}
