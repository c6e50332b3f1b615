//! Per-port TCP forwarder
//!
//! One forwarder listens on each configured port across all interfaces;
//! every synthetic loopback address routes to it because the whole of
//! `127.0.0.0/8` is local. An accepted connection's local address is
//! reverse-mapped through the DNS pool back to the hostname the client
//! originally resolved, and the connection is stitched to a CONNECT
//! tunnel toward `hostname:port`.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::dns::LoopbackPool;
use crate::error::ForwarderError;
use crate::io::tunnel_copy;
use crate::tunnel::HttpTunnelDialer;

/// TCP forwarder for one listen port
pub struct PortForwarder {
    listener: TcpListener,
    port: u16,
    pool: Arc<LoopbackPool>,
    dialer: Arc<HttpTunnelDialer>,
}

impl PortForwarder {
    /// Bind the listening socket on all interfaces
    ///
    /// Binding happens eagerly so a taken port fails startup instead of
    /// surfacing later.
    ///
    /// # Errors
    ///
    /// Returns `ForwarderError::Bind` when the port cannot be bound.
    pub async fn bind(
        port: u16,
        pool: Arc<LoopbackPool>,
        dialer: Arc<HttpTunnelDialer>,
    ) -> Result<Self, ForwarderError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| ForwarderError::bind(port, e.to_string()))?;
        // Port 0 binds an ephemeral port; report the one actually taken
        let port = listener
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(port);
        Ok(Self {
            listener,
            port,
            pool,
            dialer,
        })
    }

    /// The port this forwarder serves
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Local address of the bound listener
    ///
    /// # Errors
    ///
    /// Returns an error if the listener has no local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown or a fatal accept error
    ///
    /// Per-connection failures never end the loop; an accept error ends
    /// this forwarder only. In-flight tunnels keep draining after the
    /// loop exits.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(port = self.port, "forwarder listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(s) => s,
                        Err(err) => {
                            error!(port = self.port, error = %err, "accept failed, stopping forwarder");
                            break;
                        }
                    };

                    debug!(port = self.port, peer = %peer_addr, "connection accepted");

                    let port = self.port;
                    let pool = Arc::clone(&self.pool);
                    let dialer = Arc::clone(&self.dialer);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, peer_addr, port, pool, dialer).await {
                            error!(port = port, peer = %peer_addr, error = %err, "connection failed");
                        }
                    });
                }
                _ = shutdown.recv() => {
                    info!(port = self.port, "forwarder shutting down");
                    break;
                }
            }
        }
    }
}

/// Serve one accepted connection
///
/// Reverse-resolve the local address, open the CONNECT tunnel and pump
/// bytes until both directions have completed. Errors close the
/// connection without touching the forwarder.
async fn handle_connection(
    mut client: TcpStream,
    peer_addr: SocketAddr,
    port: u16,
    pool: Arc<LoopbackPool>,
    dialer: Arc<HttpTunnelDialer>,
) -> Result<(), ForwarderError> {
    let local_addr = client.local_addr()?;

    let IpAddr::V4(local_ip) = local_addr.ip() else {
        return Err(ForwarderError::NotIpv4 { addr: local_addr });
    };

    let Some(domain) = pool.reverse_lookup(local_ip) else {
        // The client connected to an address the pool never handed out
        return Err(ForwarderError::UnknownLocalAddress { addr: local_addr });
    };

    // The answered A record carries a trailing dot; the CONNECT target
    // must not
    let host = domain.trim_end_matches('.');
    let target = format!("{host}:{port}");

    info!(
        peer = %peer_addr,
        local = %local_addr,
        target = %target,
        "forwarding connection"
    );

    let mut upstream = dialer
        .dial(&target)
        .await
        .map_err(|e| ForwarderError::tunnel(&target, e))?;

    let result = tunnel_copy(&mut client, &mut upstream).await;
    debug!(
        target = %target,
        sent = result.client_to_upstream,
        received = result.upstream_to_client,
        "tunnel closed"
    );

    Ok(())
}
