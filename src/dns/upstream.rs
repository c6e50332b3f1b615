//! Private resolver exchange
//!
//! Queries for no-proxy zones are forwarded verbatim to the configured
//! private resolvers. The transport mirrors the inbound query (UDP in,
//! UDP out; TCP in, TCP out), resolvers are tried in order, and each
//! exchange is bounded by a 10 second deadline. The first successful
//! response is relayed back verbatim.

use std::net::SocketAddr;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::DnsProxyError;

/// Deadline for one exchange with one resolver
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Receive buffer for UDP exchanges, sized for EDNS0 responses
const UDP_RECV_BUFFER_SIZE: usize = 4096;

/// Maximum DNS message size over TCP (RFC 1035 length prefix)
const MAX_TCP_MESSAGE_SIZE: usize = 65535;

/// Transport a DNS query arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// Ordered list of private resolvers with failover
///
/// The list is replaceable after construction: resolvers discovered by
/// the platform DNS utility at start can stand in for an empty user
/// configuration.
#[derive(Debug)]
pub struct PrivateResolvers {
    servers: RwLock<Vec<String>>,
    timeout: Duration,
}

impl PrivateResolvers {
    /// Create a resolver list, normalising each address
    ///
    /// Addresses without a port get `:53` appended; empty entries are
    /// dropped.
    #[must_use]
    pub fn new(servers: &[String]) -> Self {
        Self::with_timeout(servers, UPSTREAM_TIMEOUT)
    }

    /// Create a resolver list with a custom per-exchange deadline
    #[must_use]
    pub fn with_timeout(servers: &[String], timeout: Duration) -> Self {
        Self {
            servers: RwLock::new(normalize_servers(servers)),
            timeout,
        }
    }

    /// Replace the resolver list, normalising each address
    pub fn set_servers(&self, servers: &[String]) {
        *self.servers.write() = normalize_servers(servers);
    }

    /// Snapshot of the normalised resolver addresses, in failover order
    #[must_use]
    pub fn servers(&self) -> Vec<String> {
        self.servers.read().clone()
    }

    /// Check whether any resolver is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.read().is_empty()
    }

    /// Forward raw query bytes, trying each resolver in order
    ///
    /// # Errors
    ///
    /// Returns `DnsProxyError::NoUpstream` when no resolver is configured
    /// or every resolver failed; per-resolver failures are warn-logged and
    /// fall through to the next entry.
    pub async fn forward(&self, raw: &[u8], transport: Transport) -> Result<Vec<u8>, DnsProxyError> {
        let servers = self.servers.read().clone();
        for server in &servers {
            let result = match transport {
                Transport::Udp => exchange_udp(server, raw, self.timeout).await,
                Transport::Tcp => exchange_tcp(server, raw, self.timeout).await,
            };
            match result {
                Ok(response) => {
                    debug!(server = %server, "private resolver answered");
                    return Ok(response);
                }
                Err(err) => {
                    warn!(server = %server, error = %err, "private resolver failed");
                }
            }
        }
        Err(DnsProxyError::NoUpstream)
    }
}

/// Normalise a raw server list: trim, drop empties, default the port
fn normalize_servers(servers: &[String]) -> Vec<String> {
    servers
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(normalize_resolver_addr)
        .collect()
}

/// Append `:53` when an address carries no port
pub(crate) fn normalize_resolver_addr(addr: &str) -> String {
    if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{addr}:53")
    }
}

/// One UDP exchange with one resolver
async fn exchange_udp(
    server: &str,
    raw: &[u8],
    deadline: Duration,
) -> Result<Vec<u8>, DnsProxyError> {
    let server_addr: SocketAddr = server
        .parse()
        .map_err(|e| DnsProxyError::upstream(server, format!("invalid address: {e}")))?;

    let exchange = async {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.send_to(raw, server_addr).await?;

        let mut buf = vec![0u8; UDP_RECV_BUFFER_SIZE];
        loop {
            let (n, src) = socket.recv_from(&mut buf).await?;
            // Ignore datagrams from anyone but the queried resolver
            if src == server_addr {
                buf.truncate(n);
                return Ok::<Vec<u8>, std::io::Error>(buf);
            }
        }
    };

    match timeout(deadline, exchange).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(err)) => Err(DnsProxyError::upstream(server, err.to_string())),
        Err(_) => Err(DnsProxyError::Timeout {
            server: server.to_string(),
            timeout_secs: deadline.as_secs(),
        }),
    }
}

/// One TCP exchange with one resolver, length-prefixed per RFC 1035
async fn exchange_tcp(
    server: &str,
    raw: &[u8],
    deadline: Duration,
) -> Result<Vec<u8>, DnsProxyError> {
    if raw.len() > MAX_TCP_MESSAGE_SIZE {
        return Err(DnsProxyError::upstream(server, "query exceeds 65535 bytes"));
    }

    let exchange = async {
        let mut stream = TcpStream::connect(server).await?;

        let mut send_buf = Vec::with_capacity(2 + raw.len());
        send_buf.extend_from_slice(&(raw.len() as u16).to_be_bytes());
        send_buf.extend_from_slice(raw);
        stream.write_all(&send_buf).await?;

        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await?;
        let len = u16::from_be_bytes(len_buf) as usize;
        if len == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "empty DNS response",
            ));
        }

        let mut response = vec![0u8; len];
        stream.read_exact(&mut response).await?;
        Ok::<Vec<u8>, std::io::Error>(response)
    };

    match timeout(deadline, exchange).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(err)) => Err(DnsProxyError::upstream(server, err.to_string())),
        Err(_) => Err(DnsProxyError::Timeout {
            server: server.to_string(),
            timeout_secs: deadline.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_normalize_resolver_addr() {
        assert_eq!(normalize_resolver_addr("10.0.0.1"), "10.0.0.1:53");
        assert_eq!(normalize_resolver_addr("10.0.0.1:5353"), "10.0.0.1:5353");
    }

    #[test]
    fn test_resolver_list_normalisation() {
        let resolvers = PrivateResolvers::new(&servers(&["10.0.0.1", " 10.0.0.2:54 ", ""]));
        assert_eq!(resolvers.servers(), ["10.0.0.1:53", "10.0.0.2:54"]);
        assert!(!resolvers.is_empty());

        let empty = PrivateResolvers::new(&[]);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_set_servers_replaces_list() {
        let resolvers = PrivateResolvers::new(&[]);
        assert!(resolvers.is_empty());

        resolvers.set_servers(&servers(&["10.0.0.53", "10.0.0.54:54"]));
        assert_eq!(resolvers.servers(), ["10.0.0.53:53", "10.0.0.54:54"]);

        resolvers.set_servers(&servers(&["192.168.1.1"]));
        assert_eq!(resolvers.servers(), ["192.168.1.1:53"]);
    }

    #[tokio::test]
    async fn test_forward_with_no_resolvers() {
        let resolvers = PrivateResolvers::new(&[]);
        let result = resolvers.forward(b"\x12\x34", Transport::Udp).await;
        assert!(matches!(result, Err(DnsProxyError::NoUpstream)));
    }

    #[tokio::test]
    async fn test_udp_forward_roundtrip() {
        // Fake resolver that echoes a canned response
        let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (n, peer) = upstream.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"\xab\xcdquery");
            upstream.send_to(b"\xab\xcdanswer", peer).await.unwrap();
        });

        let resolvers = PrivateResolvers::new(&servers(&[&upstream_addr.to_string()]));
        let response = resolvers
            .forward(b"\xab\xcdquery", Transport::Udp)
            .await
            .unwrap();
        assert_eq!(response, b"\xab\xcdanswer");
    }

    #[tokio::test]
    async fn test_udp_failover_to_second_resolver() {
        // First resolver never answers; second does
        let dead = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();

        let live = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let live_addr = live.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (n, peer) = live.recv_from(&mut buf).await.unwrap();
            live.send_to(&buf[..n], peer).await.unwrap();
        });

        let resolvers = PrivateResolvers::with_timeout(
            &servers(&[&dead_addr.to_string(), &live_addr.to_string()]),
            Duration::from_millis(200),
        );
        let response = resolvers
            .forward(b"\x00\x01ping", Transport::Udp)
            .await
            .unwrap();
        assert_eq!(response, b"\x00\x01ping");
        drop(dead);
    }

    #[tokio::test]
    async fn test_all_resolvers_fail() {
        let dead = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();

        let resolvers = PrivateResolvers::with_timeout(
            &servers(&[&dead_addr.to_string()]),
            Duration::from_millis(100),
        );
        let result = resolvers.forward(b"\x00\x01ping", Transport::Udp).await;
        assert!(matches!(result, Err(DnsProxyError::NoUpstream)));
    }

    #[tokio::test]
    async fn test_tcp_forward_roundtrip() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut len_buf = [0u8; 2];
            stream.read_exact(&mut len_buf).await.unwrap();
            let len = u16::from_be_bytes(len_buf) as usize;
            let mut query = vec![0u8; len];
            stream.read_exact(&mut query).await.unwrap();

            let mut reply = Vec::new();
            reply.extend_from_slice(&(query.len() as u16).to_be_bytes());
            reply.extend_from_slice(&query);
            stream.write_all(&reply).await.unwrap();
        });

        let resolvers = PrivateResolvers::new(&servers(&[&addr.to_string()]));
        let response = resolvers
            .forward(b"\x77\x88tcp-query", Transport::Tcp)
            .await
            .unwrap();
        assert_eq!(response, b"\x77\x88tcp-query");
    }
}
