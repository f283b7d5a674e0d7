//! A single-use HTTP listener on the loopback interface that captures the browser's OAuth redirect.

use crate::error::{AuthError, AuthResult};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, trace};

const DONE_PAGE: &str = "<html><head><title>gauth</title></head><body>\
    <h2>Authorization complete</h2>\
    <p>You can close this tab and return to the terminal.</p></body></html>";

const DENIED_PAGE: &str = "<html><head><title>gauth</title></head><body>\
    <h2>Authorization was not granted</h2>\
    <p>You can close this tab. Check the terminal for details.</p></body></html>";

const NOT_FOUND_PAGE: &str = "<html><body>Not found</body></html>";

/// Holds the bound socket. Dropping it closes the port, so every way out of `wait` releases it.
#[derive(Debug)]
pub(crate) struct RedirectListener {
    listener: TcpListener,
    port: u16,
}

impl RedirectListener {
    /// Binds to `port` on 127.0.0.1. Port 0 picks a free port; `port()` reports the real one.
    pub(crate) async fn bind(port: u16) -> AuthResult<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|source| AuthError::PortInUse { port, source })?;
        let port = listener
            .local_addr()
            .map_err(|source| AuthError::PortInUse { port, source })?
            .port();
        debug!("Listening for the OAuth redirect on http://localhost:{port}/");
        Ok(Self { listener, port })
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// The redirect URI that sends the browser back to this listener.
    pub(crate) fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/", self.port)
    }

    /// Blocks until one redirect arrives and returns its authorization code, or fails once
    /// `timeout` has elapsed. The listener is consumed and closed in either case.
    pub(crate) async fn wait(self, expected_state: &str, timeout: Duration) -> AuthResult<String> {
        let outcome = tokio::time::timeout(timeout, self.accept_redirect(expected_state)).await;
        drop(self);
        match outcome {
            Ok(result) => result,
            Err(_) => Err(AuthError::Timeout(timeout)),
        }
    }

    /// Connections are served concurrently because browsers open speculative connections that
    /// may never carry a request. The outcome is only reported once its response has been written.
    async fn accept_redirect(&self, expected_state: &str) -> AuthResult<String> {
        let expected: Arc<str> = Arc::from(expected_state);
        let (tx, mut rx) = mpsc::channel::<AuthResult<String>>(1);
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                Some(outcome) = rx.recv() => return outcome,
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.map_err(AuthError::Listener)?;
                    trace!("Accepted a connection from {peer}");
                    connections.spawn(serve(stream, expected.clone(), tx.clone()));
                }
            }
        }
    }
}

async fn serve(stream: TcpStream, expected: Arc<str>, tx: mpsc::Sender<AuthResult<String>>) {
    let slot: Arc<Mutex<Option<AuthResult<String>>>> = Arc::new(Mutex::new(None));
    let service = {
        let slot = slot.clone();
        service_fn(move |request: Request<Incoming>| {
            let slot = slot.clone();
            let expected = expected.clone();
            let uri = request.uri().clone();
            async move { Ok::<_, Infallible>(respond(&uri, &expected, &slot).await) }
        })
    };

    if let Err(e) = http1::Builder::new()
        .keep_alive(false)
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!("Error while serving a connection on the redirect listener: {e}");
    }

    let outcome = slot.lock().await.take();
    if let Some(outcome) = outcome {
        let _ = tx.send(outcome).await;
    }
}

/// Handles one request. Requests that do not look like an OAuth redirect (e.g. the browser asking
/// for `/favicon.ico`) get a 404 and leave `slot` empty so that we keep waiting.
async fn respond(
    uri: &Uri,
    expected_state: &str,
    slot: &Mutex<Option<AuthResult<String>>>,
) -> Response<String> {
    let redirect = match Redirect::parse(uri.path(), uri.query()) {
        Some(redirect) => redirect,
        None => {
            trace!("Ignoring request for {uri}");
            return page(StatusCode::NOT_FOUND, NOT_FOUND_PAGE);
        }
    };
    let outcome = redirect.into_code(expected_state);
    let response = match &outcome {
        Ok(_) => page(StatusCode::OK, DONE_PAGE),
        Err(_) => page(StatusCode::BAD_REQUEST, DENIED_PAGE),
    };
    let mut slot = slot.lock().await;
    if slot.is_none() {
        *slot = Some(outcome);
    }
    response
}

fn page(status: StatusCode, body: &str) -> Response<String> {
    let mut response = Response::new(body.to_string());
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

/// The query parameters of a redirect from the authorization server.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
struct Redirect {
    state: Option<String>,
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl Redirect {
    /// Returns `None` unless the request is for `/` and carries at least one of the redirect
    /// parameters.
    fn parse(path: &str, query: Option<&str>) -> Option<Self> {
        if path != "/" {
            return None;
        }
        let mut redirect = Redirect::default();
        for (key, value) in url::form_urlencoded::parse(query?.as_bytes()) {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "state" => redirect.state = value,
                "code" => redirect.code = value,
                "error" => redirect.error = value,
                "error_description" => redirect.error_description = value,
                _ => {}
            }
        }
        if redirect.state.is_none() && redirect.code.is_none() && redirect.error.is_none() {
            return None;
        }
        Some(redirect)
    }

    /// The state is checked before anything else in the redirect is trusted.
    fn into_code(self, expected_state: &str) -> AuthResult<String> {
        if self.state.as_deref() != Some(expected_state) {
            error!("The OAuth redirect carried a state value that does not match this session");
            return Err(AuthError::StateMismatch);
        }
        if let Some(error) = self.error {
            let error = match self.error_description {
                Some(description) => format!("{error} ({description})"),
                None => error,
            };
            return Err(AuthError::UserDenied { error });
        }
        match self.code {
            Some(code) if !code.is_empty() => Ok(code),
            _ => Err(AuthError::MalformedRedirect(
                "neither 'code' nor 'error' was present".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::get;

    #[test]
    fn test_parse_redirect() {
        let r = Redirect::parse("/", Some("state=abc&code=4%2F0Ab&scope=x")).unwrap();
        assert_eq!(Some("abc"), r.state.as_deref());
        assert_eq!(Some("4/0Ab"), r.code.as_deref());
        assert!(Redirect::parse("/favicon.ico", Some("state=abc")).is_none());
        assert!(Redirect::parse("/", None).is_none());
        assert!(Redirect::parse("/", Some("foo=bar")).is_none());
    }

    #[test]
    fn test_into_code() {
        let ok = Redirect::parse("/", Some("state=s&code=c")).unwrap();
        assert_eq!("c", ok.into_code("s").unwrap());

        let mismatch = Redirect::parse("/", Some("state=other&code=c")).unwrap();
        assert!(matches!(
            mismatch.into_code("s"),
            Err(AuthError::StateMismatch)
        ));

        let stateless = Redirect::parse("/", Some("code=c")).unwrap();
        assert!(matches!(
            stateless.into_code("s"),
            Err(AuthError::StateMismatch)
        ));

        let denied = Redirect::parse("/", Some("state=s&error=access_denied")).unwrap();
        match denied.into_code("s") {
            Err(AuthError::UserDenied { error }) => assert_eq!("access_denied", error),
            other => panic!("unexpected {other:?}"),
        }

        let empty = Redirect::parse("/", Some("state=s")).unwrap();
        assert!(matches!(
            empty.into_code("s"),
            Err(AuthError::MalformedRedirect(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_returns_code_after_ignoring_favicon() {
        let listener = RedirectListener::bind(0).await.unwrap();
        let port = listener.port();
        let client = tokio::spawn(async move {
            let favicon = get(port, "/favicon.ico").await;
            let redirect = get(port, "/?state=xyz&code=the-code").await;
            (favicon, redirect)
        });
        let code = listener
            .wait("xyz", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!("the-code", code);
        let (favicon, redirect) = client.await.unwrap();
        assert_eq!(404, favicon.0);
        assert_eq!(200, redirect.0);
        assert!(redirect.1.contains("Authorization complete"));
    }

    #[tokio::test]
    async fn test_wait_times_out_and_releases_port() {
        let listener = RedirectListener::bind(0).await.unwrap();
        let port = listener.port();
        let err = listener
            .wait("xyz", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Timeout(_)));
        assert!(err.to_string().contains("Timed out"));
        RedirectListener::bind(port).await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_port_in_use() {
        let taken = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();
        let err = RedirectListener::bind(port).await.unwrap_err();
        match err {
            AuthError::PortInUse { port: p, .. } => assert_eq!(port, p),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_redirect_uri() {
        let listener = RedirectListener::bind(0).await.unwrap();
        assert_eq!(
            format!("http://localhost:{}/", listener.port()),
            listener.redirect_uri()
        );
    }
}
