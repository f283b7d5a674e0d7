//! Shared test utilities: a scripted token endpoint and a fake browser.
//!
//! This module is only compiled when running tests (`#[cfg(test)]`).

use crate::auth::{
    ClientMetadata, CodeExchange, EndpointError, Presenter, TokenEndpoint, TokenGrant,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Writes a minimal `credentials.json` into `dir` and returns its path.
pub fn secret_file(dir: &Path) -> PathBuf {
    let path = dir.join("credentials.json");
    let secret_content = r#"{
        "installed": {
            "client_id": "test-client-id",
            "client_secret": "test-secret",
            "redirect_uris": ["http://localhost"],
            "auth_uri": "https://accounts.google.com/o/oauth2/auth",
            "token_uri": "https://oauth2.googleapis.com/token"
        }
    }"#;
    std::fs::write(&path, secret_content).unwrap();
    path
}

/// A `TokenEndpoint` that answers from a script and records how it was called. Clones share their
/// counters so that a test can keep one copy while the resolver owns another.
#[derive(Debug, Clone, Default)]
pub struct FakeEndpoint {
    fail_refresh: bool,
    fail_exchange: bool,
    /// Scopes reported by the exchange grant; `None` leaves them out of the response.
    granted: Option<Vec<String>>,
    refresh_calls: Arc<AtomicUsize>,
    exchange_calls: Arc<AtomicUsize>,
    last_refresh_token: Arc<Mutex<Option<String>>>,
    last_code: Arc<Mutex<Option<String>>>,
}

impl FakeEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_refresh(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    pub fn failing_exchange(mut self) -> Self {
        self.fail_exchange = true;
        self
    }

    pub fn granting(mut self, scopes: &[&str]) -> Self {
        self.granted = Some(scopes.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn last_refresh_token(&self) -> Option<String> {
        self.last_refresh_token.lock().unwrap().clone()
    }

    pub fn last_code(&self) -> Option<String> {
        self.last_code.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TokenEndpoint for FakeEndpoint {
    async fn refresh(
        &self,
        _client: &ClientMetadata,
        refresh_token: &str,
    ) -> Result<TokenGrant, EndpointError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_refresh_token.lock().unwrap() = Some(refresh_token.to_string());
        if self.fail_refresh {
            return Err(EndpointError::Rejected("invalid_grant".to_string()));
        }
        Ok(TokenGrant {
            access_token: "refreshed-access".to_string(),
            refresh_token: None,
            expires_in: Some(Duration::from_secs(3599)),
            scopes: None,
        })
    }

    async fn exchange(
        &self,
        _client: &ClientMetadata,
        exchange: CodeExchange<'_>,
    ) -> Result<TokenGrant, EndpointError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_code.lock().unwrap() = Some(exchange.code.to_string());
        assert!(exchange.redirect_uri.starts_with("http://localhost:"));
        assert!(!exchange.pkce_verifier.is_empty());
        if self.fail_exchange {
            return Err(EndpointError::Transport("connection refused".to_string()));
        }
        Ok(TokenGrant {
            access_token: "exchanged-access".to_string(),
            refresh_token: Some("exchanged-refresh".to_string()),
            expires_in: Some(Duration::from_secs(3599)),
            scopes: self.granted.clone(),
        })
    }
}

/// How the fake browser responds to the consent screen.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Reply {
    /// Redirect back with a code and the session's state.
    Approve,
    /// Redirect back with a code and a state value that was never issued.
    WrongState,
    /// Redirect back with `error=access_denied`.
    Deny,
    /// Never come back.
    Silent,
}

/// A `Presenter` that plays the part of the user's browser by sending the redirect itself.
#[derive(Debug, Clone, Copy)]
pub struct BrowserBot {
    reply: Reply,
}

impl BrowserBot {
    pub const CODE: &'static str = "4/0Ab-test-code";

    pub fn new(reply: Reply) -> Self {
        Self { reply }
    }
}

impl Presenter for BrowserBot {
    fn present(&self, url: &Url) {
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let state = query["state"].clone();
        let redirect = Url::parse(&query["redirect_uri"]).unwrap();
        let port = redirect.port().unwrap();
        let path = match self.reply {
            Reply::Approve => format!("/?state={state}&code={}", BrowserBot::CODE),
            Reply::WrongState => format!("/?state=forged&code={}", BrowserBot::CODE),
            Reply::Deny => format!("/?state={state}&error=access_denied"),
            Reply::Silent => return,
        };
        tokio::spawn(async move {
            get(port, &path).await;
        });
    }
}

/// Sends a GET to the loopback listener on `port` and returns the status and body.
pub async fn get(port: u16, path_and_query: &str) -> (u16, String) {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let response = client
        .get(format!("http://127.0.0.1:{port}{path_and_query}"))
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.text().await.unwrap())
}
