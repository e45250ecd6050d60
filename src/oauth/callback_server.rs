//! Usage: One-shot loopback listener that captures the OAuth authorization redirect.
//!
//! Exactly one connection is accepted. Whatever it asks for, it gets a plain
//! `200 OK` and its request target becomes the capture; the listener is dropped
//! before the request is answered, so nothing after the first request is served.

use crate::shared::error::{AppResult, AuthError};
use crate::shared::security::constant_time_eq;
use reqwest::Url;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;

pub const SUCCESS_MESSAGE: &str = "Authorization complete.";
const MAX_REQUEST_HEAD_BYTES: usize = 8192;

#[derive(Debug)]
pub struct BoundRedirectListener {
    port: u16,
    primary: TcpListener,
    secondary: Option<TcpListener>,
}

impl BoundRedirectListener {
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// The single request received by the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRedirect {
    /// Request target exactly as sent (path + query), empty if the request line was unreadable.
    pub uri: String,
    pub path: Option<String>,
    pub params: Vec<(String, String)>,
}

impl CapturedRedirect {
    pub fn from_request_target(target: &str) -> Self {
        let parsed = if target.starts_with('/') {
            Url::parse(&format!("http://127.0.0.1{target}")).ok()
        } else {
            Url::parse(target).ok()
        };
        let (path, params) = match parsed {
            Some(url) => (
                Some(url.path().to_string()),
                url.query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect(),
            ),
            None => (None, Vec::new()),
        };
        Self {
            uri: target.to_string(),
            path,
            params,
        }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Authorization code delivered under `expected_path`, checked against the flow's state.
    pub fn authorization_code(
        &self,
        expected_path: &str,
        expected_state: &str,
    ) -> Result<String, AuthError> {
        let path = self.path.as_deref().unwrap_or_default();
        if path != expected_path {
            return Err(AuthError::CaptureFailed(format!(
                "first request to the redirect listener was for {:?}, expected {expected_path:?}",
                if self.uri.is_empty() { "<unreadable>" } else { path }
            )));
        }

        if let Some(error) = self.param("error") {
            let description = self.param("error_description").unwrap_or_default();
            return Err(AuthError::CaptureFailed(format!(
                "identity provider returned error={error} {description}"
            )));
        }

        let state = self
            .param("state")
            .ok_or_else(|| AuthError::CaptureFailed("redirect is missing state".to_string()))?;
        if !constant_time_eq(state.as_bytes(), expected_state.as_bytes()) {
            return Err(AuthError::CaptureFailed(
                "redirect state does not match this authorization request".to_string(),
            ));
        }

        self.param("code")
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                AuthError::CaptureFailed("redirect did not contain an authorization code".to_string())
            })
    }
}

/// Bind `host:port`; `localhost` binds both loopback families on the same port when possible.
/// Port 0 picks an ephemeral port, see [`BoundRedirectListener::port`].
pub async fn bind_redirect_listener(host: &str, port: u16) -> AppResult<BoundRedirectListener> {
    if host.trim().eq_ignore_ascii_case("localhost") {
        return bind_loopback_pair(port)
            .await
            .map_err(|e| format!("SYSTEM_ERROR: redirect listener bind failed: {e}").into());
    }

    let primary = TcpListener::bind((host.trim(), port))
        .await
        .map_err(|e| format!("SYSTEM_ERROR: redirect listener bind failed on {host}:{port}: {e}"))?;
    let port = primary
        .local_addr()
        .map_err(|e| format!("SYSTEM_ERROR: redirect listener local_addr failed: {e}"))?
        .port();
    Ok(BoundRedirectListener {
        port,
        primary,
        secondary: None,
    })
}

async fn bind_loopback_pair(port: u16) -> Result<BoundRedirectListener, String> {
    let mut bind_errors: Vec<String> = Vec::new();

    for (first, second) in [("127.0.0.1", "::1"), ("::1", "127.0.0.1")] {
        let primary = match TcpListener::bind((first, port)).await {
            Ok(listener) => listener,
            Err(err) => {
                bind_errors.push(format!("{first}:{port} ({err})"));
                continue;
            }
        };
        let bound_port = primary
            .local_addr()
            .map_err(|e| format!("{first}:{port} (local_addr failed: {e})"))?
            .port();
        let secondary = match TcpListener::bind((second, bound_port)).await {
            Ok(listener) => Some(listener),
            Err(err) => {
                tracing::debug!("secondary loopback bind skipped: {second}:{bound_port} ({err})");
                None
            }
        };
        return Ok(BoundRedirectListener {
            port: bound_port,
            primary,
            secondary,
        });
    }

    Err(bind_errors.join("; "))
}

/// Block until the first request has arrived and its head has been read.
///
/// `timeout` bounds accepting and reading together; `None` waits forever.
pub async fn wait_for_redirect(
    listener: BoundRedirectListener,
    timeout: Option<Duration>,
) -> AppResult<CapturedRedirect> {
    let deadline = timeout.map(|limit| (Instant::now() + limit, limit));

    let accept_future = async {
        match listener.secondary.as_ref() {
            Some(secondary) => {
                tokio::select! {
                    result = listener.primary.accept() => result,
                    result = secondary.accept() => result,
                }
            }
            None => listener.primary.accept().await,
        }
    };

    let accepted = match deadline {
        Some((at, limit)) => tokio::time::timeout_at(at, accept_future)
            .await
            .map_err(|_| AuthError::CaptureTimeout(limit))?,
        None => accept_future.await,
    };
    let (mut socket, peer) =
        accepted.map_err(|e| format!("SYSTEM_ERROR: redirect listener accept failed: {e}"))?;

    let port = listener.port;
    drop(listener);
    tracing::debug!(port, peer = %peer, "redirect listener closed after first connection");

    let head = match deadline {
        Some((at, limit)) => tokio::time::timeout_at(at, read_request_head(&mut socket))
            .await
            .map_err(|_| AuthError::CaptureTimeout(limit))??,
        None => read_request_head(&mut socket).await?,
    };
    let target = extract_request_target(&head).unwrap_or_default();

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        SUCCESS_MESSAGE.len(),
        SUCCESS_MESSAGE
    );
    if let Err(err) = socket.write_all(response.as_bytes()).await {
        tracing::debug!("redirect response write failed: {err}");
    }
    let _ = socket.shutdown().await;

    Ok(CapturedRedirect::from_request_target(target))
}

async fn read_request_head(socket: &mut TcpStream) -> AppResult<String> {
    let mut buffer = vec![0u8; MAX_REQUEST_HEAD_BYTES];
    let mut filled = 0usize;
    while filled < buffer.len() {
        let size = socket
            .read(&mut buffer[filled..])
            .await
            .map_err(|e| format!("SYSTEM_ERROR: redirect request read failed: {e}"))?;
        if size == 0 {
            break;
        }
        filled += size;
        if buffer[..filled].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buffer[..filled]).into_owned())
}

fn extract_request_target(request: &str) -> Option<&str> {
    let first = request.lines().next()?;
    let mut parts = first.split_whitespace();
    let _method = parts.next()?;
    parts.next().filter(|target| !target.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn send_raw(port: u16, raw: &'static str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("connect");
        stream.write_all(raw.as_bytes()).await.expect("write");
        let mut out = String::new();
        stream.read_to_string(&mut out).await.expect("read");
        out
    }

    #[test]
    fn extract_request_target_takes_second_token() {
        assert_eq!(
            extract_request_target("GET /cb?code=1 HTTP/1.1\r\nHost: x\r\n\r\n"),
            Some("/cb?code=1")
        );
        assert_eq!(extract_request_target(""), None);
        assert_eq!(extract_request_target("GARBAGE"), None);
    }

    #[test]
    fn authorization_code_requires_path_state_and_code() {
        let ok = CapturedRedirect::from_request_target("/getToken?code=abc&state=s1&session_state=x");
        assert_eq!(ok.authorization_code("/getToken", "s1").expect("code"), "abc");

        let wrong_path = CapturedRedirect::from_request_target("/favicon.ico");
        let err = wrong_path.authorization_code("/getToken", "s1").expect_err("path");
        assert!(err.to_string().contains("/favicon.ico"));

        let no_code = CapturedRedirect::from_request_target("/getToken?state=s1");
        assert!(matches!(
            no_code.authorization_code("/getToken", "s1"),
            Err(AuthError::CaptureFailed(_))
        ));

        let bad_state = CapturedRedirect::from_request_target("/getToken?code=abc&state=other");
        let err = bad_state.authorization_code("/getToken", "s1").expect_err("state");
        assert!(err.to_string().contains("state"));
    }

    #[test]
    fn provider_error_is_reported() {
        let captured = CapturedRedirect::from_request_target(
            "/getToken?error=access_denied&error_description=user+cancelled&state=s1",
        );
        let err = captured.authorization_code("/getToken", "s1").expect_err("error");
        let text = err.to_string();
        assert!(text.contains("access_denied"));
        assert!(text.contains("user cancelled"));
    }

    #[tokio::test]
    async fn serves_exactly_one_request_then_releases_port() {
        let listener = bind_redirect_listener("127.0.0.1", 0).await.expect("bind");
        let port = listener.port();
        assert_ne!(port, 0);

        let client = tokio::spawn(send_raw(
            port,
            "GET /getToken?code=abc&state=s1 HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        ));
        let captured = wait_for_redirect(listener, Some(Duration::from_secs(5)))
            .await
            .expect("capture");
        assert_eq!(captured.uri, "/getToken?code=abc&state=s1");
        assert_eq!(captured.param("code"), Some("abc"));

        let reply = client.await.expect("client task");
        assert!(reply.starts_with("HTTP/1.1 200 OK"), "{reply}");
        assert!(reply.contains("text/plain"));
        assert!(reply.ends_with(SUCCESS_MESSAGE));

        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn first_request_wins_even_when_it_is_not_the_redirect() {
        let listener = bind_redirect_listener("127.0.0.1", 0).await.expect("bind");
        let port = listener.port();

        let client = tokio::spawn(send_raw(
            port,
            "POST /robots.txt HTTP/1.1\r\nHost: 127.0.0.1\r\nContent-Length: 0\r\n\r\n",
        ));
        let captured = wait_for_redirect(listener, Some(Duration::from_secs(5)))
            .await
            .expect("capture");
        let reply = client.await.expect("client task");
        assert!(reply.starts_with("HTTP/1.1 200 OK"));
        assert_eq!(captured.uri, "/robots.txt");
        assert!(captured.authorization_code("/getToken", "s1").is_err());
    }

    #[tokio::test]
    async fn wait_times_out_without_a_request() {
        let listener = bind_redirect_listener("127.0.0.1", 0).await.expect("bind");
        let err = wait_for_redirect(listener, Some(Duration::from_millis(50)))
            .await
            .expect_err("timeout");
        assert_eq!(err.code(), "AUTH_CAPTURE_TIMEOUT");
    }

    #[tokio::test]
    async fn silent_connection_does_not_outlive_the_timeout() {
        let listener = bind_redirect_listener("127.0.0.1", 0).await.expect("bind");
        let port = listener.port();
        let _idle = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("connect");

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            wait_for_redirect(listener, Some(Duration::from_millis(200))),
        )
        .await
        .expect("wait must honour its own deadline");
        let err = result.expect_err("timeout");
        assert_eq!(err.code(), "AUTH_CAPTURE_TIMEOUT");
    }

    #[test]
    fn missing_state_is_rejected() {
        let captured = CapturedRedirect::from_request_target("/getToken?code=abc");
        let err = captured.authorization_code("/getToken", "s1").expect_err("state");
        assert!(matches!(err, AuthError::CaptureFailed(_)));
        assert!(err.to_string().contains("missing state"));
    }

    #[tokio::test]
    async fn localhost_binds_a_concrete_port() {
        let listener = bind_redirect_listener("localhost", 0).await.expect("bind");
        assert_ne!(listener.port(), 0);
    }
}
