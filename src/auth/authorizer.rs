//! The interactive part of the OAuth flow: build the consent URL, show it to the user, capture the
//! redirect on a local listener and exchange the code for tokens.

use crate::auth::endpoint::{CodeExchange, EndpointError, TokenEndpoint};
use crate::auth::listener::RedirectListener;
use crate::auth::{SecretFile, TokenFile};
use crate::error::{AuthError, AuthResult};
use chrono::Utc;
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, CsrfToken, PkceCodeChallenge, RedirectUrl, Scope};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Shows the authorization URL to the user. The listener is already bound when this is called.
pub(crate) trait Presenter: Send + Sync {
    fn present(&self, url: &Url);
}

/// Prints the URL and, if enabled, opens it in the default browser.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConsolePresenter {
    open_browser: bool,
}

impl ConsolePresenter {
    pub(crate) fn new(open_browser: bool) -> Self {
        Self { open_browser }
    }
}

impl ConsolePresenter {
    fn prompt(url: &Url) -> String {
        format!("Please visit this URL to authorize this application: {url}")
    }
}

impl Presenter for ConsolePresenter {
    fn present(&self, url: &Url) {
        if !self.open_browser {
            // The URL is the only way forward, so it must not depend on the log level.
            eprintln!("{}", Self::prompt(url));
            return;
        }
        info!("{}", Self::prompt(url));
        if let Err(e) = webbrowser::open(url.as_str()) {
            eprintln!("{}", Self::prompt(url));
            warn!("Unable to open a browser ({e}), please open the URL above manually");
        }
    }
}

/// Settings for one interactive authorization.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AuthorizerSettings {
    pub(crate) port: u16,
    pub(crate) timeout: Duration,
    /// Adds `prompt=consent` so that Google issues a refresh token even on repeat consent.
    pub(crate) force_consent: bool,
}

pub(crate) struct Authorizer {
    settings: AuthorizerSettings,
    presenter: Box<dyn Presenter>,
}

impl Authorizer {
    pub(crate) fn new(settings: AuthorizerSettings, presenter: Box<dyn Presenter>) -> Self {
        Self {
            settings,
            presenter,
        }
    }

    /// Runs the consent flow once. No retries; the listener is closed on every exit path.
    pub(crate) async fn authorize(
        &self,
        endpoint: &dyn TokenEndpoint,
        scopes: &[String],
        secret: &SecretFile,
    ) -> AuthResult<TokenFile> {
        let port = self.settings.port;
        if port != 0 && !secret.accepts_redirect(port) {
            warn!(
                "None of the redirect URIs in the client secret file match \
                http://localhost:{port}/, the provider may refuse the redirect"
            );
        }

        let listener = RedirectListener::bind(port).await?;
        if listener.port() != port {
            debug!("Bound the redirect listener to port {}", listener.port());
        }
        let redirect_uri = listener.redirect_uri();
        let session = Session::new(secret, scopes, &redirect_uri, self.settings.force_consent)?;

        self.presenter.present(&session.url);
        info!(
            "Waiting up to {}s for the browser to return to {redirect_uri}",
            self.settings.timeout.as_secs()
        );
        let code = listener
            .wait(session.state.secret(), self.settings.timeout)
            .await?;
        debug!("Received an authorization code");

        let client = secret.client();
        let grant = endpoint
            .exchange(
                &client,
                CodeExchange {
                    code: &code,
                    redirect_uri: &redirect_uri,
                    pkce_verifier: &session.pkce_verifier,
                },
            )
            .await
            .map_err(AuthError::ExchangeFailed)?;
        Ok(TokenFile::from_grant(grant, client, scopes, Utc::now()))
    }
}

/// Per-run authorization state that only lives in memory.
struct Session {
    url: Url,
    state: CsrfToken,
    pkce_verifier: String,
}

impl Session {
    fn new(
        secret: &SecretFile,
        scopes: &[String],
        redirect_uri: &str,
        force_consent: bool,
    ) -> AuthResult<Self> {
        let auth_url = AuthUrl::new(secret.auth_uri().to_string()).map_err(|e| {
            AuthError::InvalidEndpoint(EndpointError::Config(format!(
                "Invalid auth_uri '{}': {e}",
                secret.auth_uri()
            )))
        })?;
        let redirect = RedirectUrl::new(redirect_uri.to_string()).map_err(|e| {
            AuthError::InvalidEndpoint(EndpointError::Config(format!(
                "Invalid redirect URI '{redirect_uri}': {e}"
            )))
        })?;
        let client = BasicClient::new(ClientId::new(secret.client_id().to_string()))
            .set_auth_uri(auth_url)
            .set_redirect_uri(redirect);

        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let mut request = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(scopes.iter().cloned().map(Scope::new))
            .set_pkce_challenge(challenge)
            .add_extra_param("access_type", "offline");
        if force_consent {
            request = request.add_extra_param("prompt", "consent");
        }
        let (url, state) = request.url();
        Ok(Self {
            url,
            state,
            pkce_verifier: verifier.secret().clone(),
        })
    }
}
