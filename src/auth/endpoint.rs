//! The token endpoint seam. The resolver and the authorizer only see `TokenEndpoint`, which keeps
//! them independent of the OAuth library and lets tests script the provider's answers.

use crate::auth::ClientMetadata;
use async_trait::async_trait;
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::{
    AuthType, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
    HttpClientError, PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError,
    TokenResponse, TokenUrl,
};
use std::time::Duration;
use tracing::debug;

/// What the token endpoint hands back for a code exchange or a refresh.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<Duration>,
    /// `None` when the provider did not report the granted scopes.
    pub scopes: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("The token endpoint rejected the request: {0}")]
    Rejected(String),

    #[error("Unable to reach the token endpoint: {0}")]
    Transport(String),

    #[error("The token endpoint sent a response that could not be understood: {0}")]
    Malformed(String),

    #[error("{0}")]
    Config(String),
}

/// A code exchange as the authorizer hands it to the token endpoint.
#[derive(Debug)]
pub(crate) struct CodeExchange<'a> {
    pub(crate) code: &'a str,
    /// Must be byte-for-byte the redirect URI used to build the authorization URL.
    pub(crate) redirect_uri: &'a str,
    pub(crate) pkce_verifier: &'a str,
}

#[async_trait]
pub(crate) trait TokenEndpoint: Send + Sync {
    /// Trades a refresh token for a new access token.
    async fn refresh(
        &self,
        client: &ClientMetadata,
        refresh_token: &str,
    ) -> Result<TokenGrant, EndpointError>;

    /// Trades an authorization code for tokens.
    async fn exchange(
        &self,
        client: &ClientMetadata,
        exchange: CodeExchange<'_>,
    ) -> Result<TokenGrant, EndpointError>;
}

type TokenClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Talks to the provider's token endpoint with the `oauth2` crate over `reqwest`.
#[derive(Debug, Clone)]
pub(crate) struct OAuthEndpoint {
    http: reqwest::Client,
}

impl OAuthEndpoint {
    pub(crate) fn new() -> Result<Self, EndpointError> {
        // Following redirects from the token endpoint would allow SSRF.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| EndpointError::Config(format!("Unable to build the HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl TokenEndpoint for OAuthEndpoint {
    async fn refresh(
        &self,
        client: &ClientMetadata,
        refresh_token: &str,
    ) -> Result<TokenGrant, EndpointError> {
        debug!("Refreshing the access token at {}", client.token_uri);
        let oauth = token_client(client)?;
        let response = oauth
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(classify)?;
        Ok(grant(response))
    }

    async fn exchange(
        &self,
        client: &ClientMetadata,
        exchange: CodeExchange<'_>,
    ) -> Result<TokenGrant, EndpointError> {
        debug!("Exchanging the authorization code at {}", client.token_uri);
        let redirect = RedirectUrl::new(exchange.redirect_uri.to_string()).map_err(|e| {
            EndpointError::Config(format!(
                "Invalid redirect URI '{}': {e}",
                exchange.redirect_uri
            ))
        })?;
        let oauth = token_client(client)?.set_redirect_uri(redirect);
        let response = oauth
            .exchange_code(AuthorizationCode::new(exchange.code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(exchange.pkce_verifier.to_string()))
            .request_async(&self.http)
            .await
            .map_err(classify)?;
        Ok(grant(response))
    }
}

fn token_client(client: &ClientMetadata) -> Result<TokenClient, EndpointError> {
    let token_url = TokenUrl::new(client.token_uri.clone()).map_err(|e| {
        EndpointError::Config(format!("Invalid token_uri '{}': {e}", client.token_uri))
    })?;
    Ok(BasicClient::new(ClientId::new(client.client_id.clone()))
        .set_client_secret(ClientSecret::new(client.client_secret.clone()))
        .set_auth_type(AuthType::RequestBody)
        .set_token_uri(token_url))
}

fn classify(e: RequestTokenError<HttpClientError<reqwest::Error>, BasicErrorResponse>) -> EndpointError {
    match e {
        RequestTokenError::ServerResponse(response) => EndpointError::Rejected(response.to_string()),
        RequestTokenError::Request(e) => EndpointError::Transport(e.to_string()),
        RequestTokenError::Parse(e, _) => EndpointError::Malformed(e.to_string()),
        RequestTokenError::Other(message) => EndpointError::Malformed(message),
    }
}

fn grant(response: BasicTokenResponse) -> TokenGrant {
    TokenGrant {
        access_token: response.access_token().secret().clone(),
        refresh_token: response.refresh_token().map(|t| t.secret().clone()),
        expires_in: response.expires_in(),
        scopes: response
            .scopes()
            .map(|scopes| scopes.iter().map(|s| s.as_str().to_string()).collect()),
    }
}
