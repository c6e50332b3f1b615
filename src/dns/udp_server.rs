//! DNS interception server, UDP transport

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::time;
use tracing::{debug, error, info, trace};

use super::handler::DnsHandler;
use super::upstream::Transport;
use crate::error::DnsProxyError;

/// UDP DNS server
///
/// Each received datagram is handled on its own task so a slow private
/// resolver exchange never blocks the receive loop.
pub struct DnsUdpServer {
    socket: Arc<UdpSocket>,
    handler: Arc<DnsHandler>,
}

impl DnsUdpServer {
    /// Bind to the given address
    ///
    /// # Errors
    ///
    /// Returns `DnsProxyError::Bind` when the socket cannot be bound.
    pub async fn bind(addr: SocketAddr, handler: Arc<DnsHandler>) -> Result<Self, DnsProxyError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| DnsProxyError::bind("UDP", addr.to_string(), e.to_string()))?;
        Ok(Self {
            socket: Arc::new(socket),
            handler,
        })
    }

    /// Local address of the bound socket
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve queries until the shutdown signal fires
    pub async fn run_until_shutdown(self, mut shutdown: oneshot::Receiver<()>) {
        // EDNS allows messages up to 65535 bytes
        let mut buffer = [0u8; 65535];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buffer) => {
                    let (n, peer_addr) = match received {
                        Ok(r) => r,
                        Err(err) => {
                            error!(error = %err, "DNS UDP recv error");
                            time::sleep(Duration::from_secs(1)).await;
                            continue;
                        }
                    };

                    trace!(bytes = n, peer = %peer_addr, "DNS UDP query received");

                    let raw = buffer[..n].to_vec();
                    let handler = Arc::clone(&self.handler);
                    let socket = Arc::clone(&self.socket);
                    tokio::spawn(async move {
                        if let Some(response) = handler.handle(&raw, Transport::Udp).await {
                            if let Err(err) = socket.send_to(&response, peer_addr).await {
                                debug!(peer = %peer_addr, error = %err, "DNS UDP send error");
                            }
                        }
                    });
                }
                _ = &mut shutdown => {
                    info!("DNS UDP server shutting down");
                    break;
                }
            }
        }
    }
}
