//! Forward TCP dialer
//!
//! The CONNECT dialer reaches the upstream proxy through this seam, so
//! tests and alternative transports can substitute their own connector.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

/// Keepalive idle time applied to upstream connections
///
/// Long-lived idle tunnels (SSH, long-polling) are a primary use case;
/// keepalive probes keep middleboxes from silently dropping them.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(3 * 60);

/// A plain TCP connector
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a TCP connection to `host:port`
    async fn dial(&self, addr: &str) -> io::Result<TcpStream>;
}

/// Default dialer: direct TCP connect with keepalive enabled
///
/// `TcpStream::connect` resolves the address and tries every returned
/// address, so dual-stack targets work out of the box.
#[derive(Debug, Clone)]
pub struct KeepaliveDialer {
    keepalive: Duration,
}

impl KeepaliveDialer {
    /// Create a dialer with the default 3 minute keepalive
    #[must_use]
    pub fn new() -> Self {
        Self {
            keepalive: DEFAULT_KEEPALIVE,
        }
    }

    /// Create a dialer with a custom keepalive idle time
    #[must_use]
    pub fn with_keepalive(keepalive: Duration) -> Self {
        Self { keepalive }
    }
}

impl Default for KeepaliveDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialer for KeepaliveDialer {
    async fn dial(&self, addr: &str) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(addr).await?;
        let keepalive = TcpKeepalive::new().with_time(self.keepalive);
        SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
        Ok(stream)
    }
}
