//! HTTP CONNECT tunnel dialer
//!
//! Negotiates a raw TCP tunnel through an upstream HTTP proxy. The
//! response head is consumed one byte at a time: everything after the
//! `\r\n\r\n` terminator belongs to the tunneled protocol, so no
//! buffered reader may touch the socket during this phase.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};
use url::Url;

use super::dialer::Dialer;
use crate::error::TunnelError;

/// Deadline covering the whole CONNECT response head read
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the response head; a sane proxy stays well under this
const MAX_RESPONSE_HEAD: usize = 64 * 1024;

/// Dialer that tunnels through an upstream HTTP proxy via CONNECT
pub struct HttpTunnelDialer {
    proxy_addr: String,
    proxy_host: String,
    auth: Option<String>,
    forward: Box<dyn Dialer>,
    handshake_timeout: Duration,
}

impl HttpTunnelDialer {
    /// Build a dialer from the upstream proxy URL
    ///
    /// Userinfo in the URL becomes a precomputed Basic credential; an
    /// absent or empty username omits the `Proxy-Authorization` header.
    ///
    /// # Errors
    ///
    /// Returns `TunnelError::UnsupportedScheme` for non-http URLs and
    /// `TunnelError::MissingHost` when the URL has no host.
    pub fn from_url(url: &Url, forward: Box<dyn Dialer>) -> Result<Self, TunnelError> {
        if url.scheme() != "http" {
            return Err(TunnelError::UnsupportedScheme(url.scheme().to_string()));
        }
        let host = url.host_str().ok_or(TunnelError::MissingHost)?.to_string();
        let port = url.port().unwrap_or(80);

        let auth = if url.username().is_empty() {
            None
        } else {
            let credentials = format!("{}:{}", url.username(), url.password().unwrap_or(""));
            Some(BASE64.encode(credentials))
        };

        Ok(Self {
            proxy_addr: format!("{host}:{port}"),
            proxy_host: host,
            auth,
            forward,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        })
    }

    /// Override the handshake deadline
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Host component of the proxy URL
    ///
    /// The supervisor adds this to the no-proxy zones so the proxy never
    /// tunnels to itself.
    #[must_use]
    pub fn proxy_host(&self) -> &str {
        &self.proxy_host
    }

    /// `host:port` the forward dialer connects to
    #[must_use]
    pub fn proxy_addr(&self) -> &str {
        &self.proxy_addr
    }

    /// Open a tunnel to `target` (`host:port`) through the proxy
    ///
    /// On success the returned stream is positioned exactly at the first
    /// byte of the tunneled protocol.
    ///
    /// # Errors
    ///
    /// Returns `TunnelError::Status` carrying the status line when the
    /// proxy answers anything but 200, and dial/timeout/parse errors
    /// otherwise.
    pub async fn dial(&self, target: &str) -> Result<TcpStream, TunnelError> {
        let mut stream = self
            .forward
            .dial(&self.proxy_addr)
            .await
            .map_err(|e| TunnelError::proxy_dial(&self.proxy_addr, e.to_string()))?;

        let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
        if let Some(auth) = &self.auth {
            request.push_str(&format!("Proxy-Authorization: Basic {auth}\r\n"));
        }
        request.push_str("\r\n");

        stream.write_all(request.as_bytes()).await?;
        trace!(target = %target, proxy = %self.proxy_addr, "CONNECT request sent");

        let head = match timeout(self.handshake_timeout, read_response_head(&mut stream)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TunnelError::HandshakeTimeout {
                    timeout_secs: self.handshake_timeout.as_secs(),
                });
            }
        };

        let status_line = parse_status_line(&head)?;
        let code = status_code(&status_line)?;
        if code != 200 {
            return Err(TunnelError::Status(status_line));
        }

        debug!(target = %target, "CONNECT tunnel established");
        Ok(stream)
    }
}

impl std::fmt::Debug for HttpTunnelDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTunnelDialer")
            .field("proxy_addr", &self.proxy_addr)
            .field("auth", &self.auth.is_some())
            .finish()
    }
}

/// Read the response head up to and including `\r\n\r\n`
///
/// One byte per read, tracked by a four-state automaton that advances on
/// the expected byte and resets to the start otherwise. Reading any
/// further would steal bytes from the tunneled stream.
async fn read_response_head(stream: &mut TcpStream) -> Result<Vec<u8>, TunnelError> {
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    let mut state = 0u8;

    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(TunnelError::MalformedResponse(
                "proxy closed connection before end of response head".into(),
            ));
        }
        head.push(byte[0]);
        if head.len() > MAX_RESPONSE_HEAD {
            return Err(TunnelError::MalformedResponse(
                "response head exceeds 64 KiB".into(),
            ));
        }

        state = match (state, byte[0]) {
            (0, b'\r') => 1,
            (1, b'\n') => 2,
            (2, b'\r') => 3,
            (3, b'\n') => return Ok(head),
            _ => 0,
        };
    }
}

/// Extract the status line from the accumulated head
fn parse_status_line(head: &[u8]) -> Result<String, TunnelError> {
    let text = String::from_utf8_lossy(head);
    let line = text
        .lines()
        .next()
        .ok_or_else(|| TunnelError::MalformedResponse("empty response head".into()))?;
    Ok(line.to_string())
}

/// Parse the numeric status code out of a status line
fn status_code(status_line: &str) -> Result<u16, TunnelError> {
    status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| {
            TunnelError::MalformedResponse(format!("no status code in '{status_line}'"))
        })
}
