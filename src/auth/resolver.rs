//! Decides whether the token on disk can be reused, should be refreshed, or must be replaced through
//! interactive authorization, and persists the result.

use crate::auth::authorizer::Authorizer;
use crate::auth::endpoint::TokenEndpoint;
use crate::auth::store::{Loaded, TokenStore};
use crate::auth::{SecretFile, TokenFile};
use crate::error::{AuthError, AuthResult};
use chrono::Utc;
use serde::Serialize;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// How the token that was handed back came to be.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// The token on disk was valid and was not rewritten.
    Reused,
    /// The token was refreshed silently and saved.
    Refreshed,
    /// The user went through the consent flow and the new token was saved.
    Authorized,
}

serde_plain::derive_display_from_serialize!(Source);

#[derive(Debug, Clone)]
pub struct Resolution {
    pub token: TokenFile,
    pub source: Source,
}

enum State {
    Start,
    LoadedValid(TokenFile),
    LoadedInvalid,
    Refreshing(TokenFile, String),
    Refreshed(TokenFile),
    RefreshFailed,
    Authorizing(SecretFile),
    Authorized(TokenFile),
    Persisted(TokenFile, Source),
}

impl Debug for State {
    /// Tokens are left out so that they never end up in the logs.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Start => "Start",
            State::LoadedValid(_) => "LoadedValid",
            State::LoadedInvalid => "LoadedInvalid",
            State::Refreshing(..) => "Refreshing",
            State::Refreshed(_) => "Refreshed",
            State::RefreshFailed => "RefreshFailed",
            State::Authorizing(_) => "Authorizing",
            State::Authorized(_) => "Authorized",
            State::Persisted(..) => "Persisted",
        };
        f.write_str(name)
    }
}

pub(crate) struct Resolver {
    store: TokenStore,
    client_secret_path: PathBuf,
    scopes: Vec<String>,
    endpoint: Box<dyn TokenEndpoint>,
    /// `None` forbids interactive authorization; the run fails instead of opening a browser.
    authorizer: Option<Authorizer>,
}

impl Resolver {
    pub(crate) fn new(
        store: TokenStore,
        client_secret_path: impl Into<PathBuf>,
        scopes: Vec<String>,
        endpoint: Box<dyn TokenEndpoint>,
        authorizer: Option<Authorizer>,
    ) -> Self {
        Self {
            store,
            client_secret_path: client_secret_path.into(),
            scopes,
            endpoint,
            authorizer,
        }
    }

    /// Runs the state machine to completion. A corrupt token file and a rejected refresh only
    /// change the path taken; every error returned here ends the run.
    pub(crate) async fn resolve(&self) -> AuthResult<Resolution> {
        let mut state = State::Start;
        loop {
            debug!("Resolver state: {state:?}");
            state = match state {
                State::LoadedValid(token) => {
                    return Ok(Resolution {
                        token,
                        source: Source::Reused,
                    })
                }
                State::Persisted(token, source) => return Ok(Resolution { token, source }),
                other => self.step(other).await?,
            };
        }
    }

    async fn step(&self, state: State) -> AuthResult<State> {
        Ok(match state {
            State::Start => self.load().await?,
            State::Refreshing(token, refresh_token) => self.refresh(token, &refresh_token).await,
            State::Refreshed(token) => {
                self.store.save(&token).await?;
                info!("Refreshed credentials saved to {}", self.store.path().display());
                State::Persisted(token, Source::Refreshed)
            }
            State::RefreshFailed => {
                self.store.delete().await?;
                State::LoadedInvalid
            }
            State::LoadedInvalid => {
                if self.authorizer.is_none() {
                    return Err(AuthError::InteractionRequired);
                }
                let secret = SecretFile::load(&self.client_secret_path).await?;
                State::Authorizing(secret)
            }
            State::Authorizing(secret) => {
                let authorizer = self
                    .authorizer
                    .as_ref()
                    .ok_or(AuthError::InteractionRequired)?;
                info!("No valid credentials found, starting the OAuth consent flow");
                let token = authorizer
                    .authorize(self.endpoint.as_ref(), &self.scopes, &secret)
                    .await?;
                // Granular consent lets the user untick scopes; such a token is never saved.
                let missing = token.missing_scopes(&self.scopes);
                if !missing.is_empty() {
                    return Err(AuthError::InsufficientScopes { missing });
                }
                State::Authorized(token)
            }
            State::Authorized(token) => {
                self.store.save(&token).await?;
                info!("Credentials saved to {}", self.store.path().display());
                State::Persisted(token, Source::Authorized)
            }
            terminal @ (State::LoadedValid(_) | State::Persisted(..)) => terminal,
        })
    }

    async fn load(&self) -> AuthResult<State> {
        let path = self.store.path();
        Ok(match self.store.load().await? {
            Loaded::NotFound => {
                debug!("No token file at {}", path.display());
                State::LoadedInvalid
            }
            Loaded::Corrupt(e) => {
                warn!(
                    "Error loading token file {}: {e}. It will be deleted and you will need to \
                    re-authenticate.",
                    path.display()
                );
                self.store.delete().await?;
                State::LoadedInvalid
            }
            Loaded::Found(token) if token.is_valid(&self.scopes, Utc::now()) => {
                info!("Credentials are valid and loaded from {}", path.display());
                State::LoadedValid(token)
            }
            Loaded::Found(token) => match token.refresh_token().map(str::to_string) {
                Some(refresh_token) => State::Refreshing(token, refresh_token),
                None => {
                    info!("Credentials are no longer valid and cannot be refreshed");
                    State::LoadedInvalid
                }
            },
        })
    }

    /// A refresh that fails, or that succeeds but still does not satisfy the required scopes, is
    /// treated as rejected.
    async fn refresh(&self, mut token: TokenFile, refresh_token: &str) -> State {
        info!("Credentials expired or insufficient, refreshing");
        match self.endpoint.refresh(&token.client(), refresh_token).await {
            Ok(grant) => {
                token.apply_refresh(grant, Utc::now());
                if token.is_valid(&self.scopes, Utc::now()) {
                    State::Refreshed(token)
                } else {
                    warn!("The refreshed token does not grant the required scopes");
                    State::RefreshFailed
                }
            }
            Err(e) => {
                warn!("Error refreshing token: {e}. Need to re-authenticate.");
                State::RefreshFailed
            }
        }
    }
}
