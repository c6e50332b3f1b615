//! DNS interception server
//!
//! Binds the UDP and TCP transports on the same address and runs both
//! against the shared query handler. Shutdown signals each transport
//! through its own channel so the supervisor can stop the DNS surface
//! before tearing down the forwarders.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;

use super::handler::DnsHandler;
use super::tcp_server::DnsTcpServer;
use super::udp_server::DnsUdpServer;
use crate::error::DnsProxyError;

/// Builder for a [`DnsProxy`]
pub struct DnsProxyBuilder {
    listen_addr: SocketAddr,
    handler: Arc<DnsHandler>,
    enable_udp: bool,
    enable_tcp: bool,
}

impl DnsProxyBuilder {
    /// Create a builder with both transports enabled
    #[must_use]
    pub fn new(listen_addr: SocketAddr, handler: Arc<DnsHandler>) -> Self {
        Self {
            listen_addr,
            handler,
            enable_udp: true,
            enable_tcp: true,
        }
    }

    /// Enable or disable the UDP transport
    #[must_use]
    pub fn udp(mut self, enable: bool) -> Self {
        self.enable_udp = enable;
        self
    }

    /// Enable or disable the TCP transport
    #[must_use]
    pub fn tcp(mut self, enable: bool) -> Self {
        self.enable_tcp = enable;
        self
    }

    /// Bind the enabled transports
    ///
    /// # Errors
    ///
    /// Returns `DnsProxyError::Bind` when a listener cannot be bound, and
    /// an error when both transports are disabled.
    pub async fn build(self) -> Result<DnsProxy, DnsProxyError> {
        if !self.enable_udp && !self.enable_tcp {
            return Err(DnsProxyError::bind(
                "UDP/TCP",
                self.listen_addr.to_string(),
                "no DNS transport enabled",
            ));
        }

        let udp = if self.enable_udp {
            Some(DnsUdpServer::bind(self.listen_addr, Arc::clone(&self.handler)).await?)
        } else {
            None
        };

        let tcp = if self.enable_tcp {
            Some(DnsTcpServer::bind(self.listen_addr, Arc::clone(&self.handler)).await?)
        } else {
            None
        };

        Ok(DnsProxy {
            udp,
            tcp,
            handler: self.handler,
        })
    }
}

/// Bound DNS interception server, not yet serving
pub struct DnsProxy {
    udp: Option<DnsUdpServer>,
    tcp: Option<DnsTcpServer>,
    handler: Arc<DnsHandler>,
}

impl DnsProxy {
    /// Create a builder
    #[must_use]
    pub fn builder(listen_addr: SocketAddr, handler: Arc<DnsHandler>) -> DnsProxyBuilder {
        DnsProxyBuilder::new(listen_addr, handler)
    }

    /// The shared query handler
    #[must_use]
    pub fn handler(&self) -> &Arc<DnsHandler> {
        &self.handler
    }

    /// Local address of the UDP transport, if enabled
    pub fn udp_local_addr(&self) -> Option<std::io::Result<SocketAddr>> {
        self.udp.as_ref().map(DnsUdpServer::local_addr)
    }

    /// Local address of the TCP transport, if enabled
    pub fn tcp_local_addr(&self) -> Option<std::io::Result<SocketAddr>> {
        self.tcp.as_ref().map(DnsTcpServer::local_addr)
    }

    /// Spawn the serving loops, returning a handle used to stop them
    #[must_use]
    pub fn start(self) -> DnsProxyHandle {
        let mut handle = DnsProxyHandle {
            udp_shutdown: None,
            tcp_shutdown: None,
            tasks: Vec::new(),
        };

        if let Some(udp) = self.udp {
            if let Ok(addr) = udp.local_addr() {
                info!(addr = %addr, "DNS UDP server listening");
            }
            let (tx, rx) = oneshot::channel();
            handle.udp_shutdown = Some(tx);
            handle.tasks.push(tokio::spawn(udp.run_until_shutdown(rx)));
        }

        if let Some(tcp) = self.tcp {
            if let Ok(addr) = tcp.local_addr() {
                info!(addr = %addr, "DNS TCP server listening");
            }
            let (tx, rx) = oneshot::channel();
            handle.tcp_shutdown = Some(tx);
            handle.tasks.push(tokio::spawn(tcp.run_until_shutdown(rx)));
        }

        handle
    }
}

/// Handle over the running DNS servers
pub struct DnsProxyHandle {
    udp_shutdown: Option<oneshot::Sender<()>>,
    tcp_shutdown: Option<oneshot::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl DnsProxyHandle {
    /// Signal both transports and wait for their loops to exit
    pub async fn shutdown(self) {
        if let Some(tx) = self.udp_shutdown {
            let _ = tx.send(());
        }
        if let Some(tx) = self.tcp_shutdown {
            let _ = tx.send(());
        }
        for task in self.tasks {
            let _ = task.await;
        }
        info!("DNS servers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::pool::{parse_ip_range, LoopbackPool};
    use crate::dns::upstream::PrivateResolvers;
    use crate::rules::NoProxy;

    fn test_handler() -> Arc<DnsHandler> {
        let pool = Arc::new(LoopbackPool::new(
            parse_ip_range("127.0.1.0-127.0.1.100").unwrap(),
        ));
        Arc::new(DnsHandler::new(
            pool,
            Arc::new(NoProxy::default()),
            PrivateResolvers::new(&[]),
        ))
    }

    #[tokio::test]
    async fn test_builder_binds_both_transports() {
        let proxy = DnsProxy::builder("127.0.0.1:0".parse().unwrap(), test_handler())
            .build()
            .await
            .unwrap();

        assert!(proxy.udp_local_addr().is_some());
        assert!(proxy.tcp_local_addr().is_some());
    }

    #[tokio::test]
    async fn test_udp_only() {
        let proxy = DnsProxy::builder("127.0.0.1:0".parse().unwrap(), test_handler())
            .tcp(false)
            .build()
            .await
            .unwrap();

        assert!(proxy.udp_local_addr().is_some());
        assert!(proxy.tcp_local_addr().is_none());
    }

    #[tokio::test]
    async fn test_both_disabled_is_an_error() {
        let result = DnsProxy::builder("127.0.0.1:0".parse().unwrap(), test_handler())
            .udp(false)
            .tcp(false)
            .build()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let proxy = DnsProxy::builder("127.0.0.1:0".parse().unwrap(), test_handler())
            .build()
            .await
            .unwrap();

        let handle = proxy.start();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle.shutdown())
            .await
            .expect("shutdown should complete promptly");
    }
}
