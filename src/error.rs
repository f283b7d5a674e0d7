use crate::auth::EndpointError;
use std::path::PathBuf;
use std::time::Duration;

pub type Error = anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) type AuthResult<T> = std::result::Result<T, AuthError>;

/// The ways in which resolving a credential can fail. Every variant terminates the run. The
/// recoverable conditions (a corrupt token file, a rejected refresh) never show up here because
/// the resolver handles them by choosing a different path.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Unable to {action} the token file at '{}'", .path.display())]
    StorageIo {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "The client secret file '{}' could not be used: {reason}. Download the OAuth client \
        JSON for a Desktop application from the Google Cloud Console and place it at this path.",
        .path.display()
    )]
    MissingClientDescriptor { path: PathBuf, reason: String },

    #[error(
        "Unable to listen for the OAuth redirect on localhost:{port}. Another program may be \
        using the port, or the port does not match the redirect URI registered for your client."
    )]
    PortInUse {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("The redirect listener failed while waiting for the browser")]
    Listener(#[source] std::io::Error),

    #[error("Timed out after {}s waiting for you to finish authorizing in the browser", .0.as_secs())]
    Timeout(Duration),

    #[error(
        "The OAuth redirect carried an unexpected state value and was rejected. This may \
        indicate a forged request."
    )]
    StateMismatch,

    #[error("Authorization was denied in the browser: {error}")]
    UserDenied { error: String },

    #[error("The OAuth redirect did not contain an authorization code: {0}")]
    MalformedRedirect(String),

    #[error("Unable to exchange the authorization code for tokens")]
    ExchangeFailed(#[source] EndpointError),

    #[error("The OAuth endpoint configuration is invalid")]
    InvalidEndpoint(#[source] EndpointError),

    #[error(
        "Authorization succeeded but the following scopes were not granted: {}. Run 'gauth auth' \
        again and allow every requested permission on the consent screen.",
        .missing.join(", ")
    )]
    InsufficientScopes { missing: Vec<String> },

    #[error("No usable token was found and interactive authorization is required. Run 'gauth auth'.")]
    InteractionRequired,
}
