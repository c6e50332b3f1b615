//! Supervisor
//!
//! Builds the redirection fabric from a validated configuration: one
//! DNS interceptor and one port forwarder per configured port, all
//! sharing the synthetic pool and the CONNECT dialer. Binding happens
//! eagerly so port conflicts fail fast; the start phase repoints the
//! system resolver, adopts any resolvers it replaced, and then starts
//! forwarders before DNS so no binding is handed out to a client the
//! forwarders cannot yet receive.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::dns::{
    parse_ip_range, DnsHandler, DnsProxy, DnsProxyHandle, LoopbackPool, PrivateResolvers,
};
use crate::error::{Result, TransproxyError};
use crate::forwarder::PortForwarder;
use crate::rules::NoProxy;
use crate::sysdns::{NoopSystemDns, SystemDns};
use crate::tunnel::{HttpTunnelDialer, KeepaliveDialer};

/// Fully bound proxy, ready to start serving
pub struct Transproxy {
    dns: DnsProxy,
    forwarders: Vec<PortForwarder>,
    pool: Arc<LoopbackPool>,
    sysdns: Box<dyn SystemDns>,
    /// Whether start may adopt resolvers discovered by the platform
    /// DNS utility (the user configured none)
    adopt_discovered: bool,
}

impl Transproxy {
    /// Bind every component, leaving the system DNS unmanaged
    ///
    /// # Errors
    ///
    /// Any bind or configuration failure here is fatal for startup.
    pub async fn bind(config: &Config) -> Result<Self> {
        Self::bind_with_sysdns(config, Box::new(NoopSystemDns)).await
    }

    /// Bind every component with a platform DNS utility
    ///
    /// Nothing touches the system resolver yet; `sysdns.setup()` runs
    /// during [`Transproxy::start`].
    ///
    /// # Errors
    ///
    /// Any bind or configuration failure here is fatal for startup.
    pub async fn bind_with_sysdns(
        config: &Config,
        sysdns: Box<dyn SystemDns>,
    ) -> Result<Self> {
        let proxy_url = config.proxy_url()?;

        let mut rules = NoProxy::from_items(&config.no_proxy);
        if let Some(host) = proxy_url.host_str() {
            // The proxy must never be asked to tunnel to itself
            rules.push_zone(host);
        }
        rules.log_zones();

        let pool = Arc::new(LoopbackPool::new(parse_ip_range(&config.ip_range)?));

        let dialer = Arc::new(
            HttpTunnelDialer::from_url(&proxy_url, Box::new(KeepaliveDialer::new()))
                .map_err(TransproxyError::Tunnel)?,
        );

        let mut forwarders = Vec::with_capacity(config.listen_ports.len());
        for &port in &config.listen_ports {
            let forwarder =
                PortForwarder::bind(port, Arc::clone(&pool), Arc::clone(&dialer)).await?;
            forwarders.push(forwarder);
        }

        let handler = Arc::new(DnsHandler::new(
            Arc::clone(&pool),
            Arc::new(rules),
            PrivateResolvers::new(&config.private_dns),
        ));

        let dns = DnsProxy::builder(config.dns_listen_addr()?, handler)
            .udp(config.dns_udp)
            .tcp(config.dns_tcp)
            .build()
            .await?;

        Ok(Self {
            dns,
            forwarders,
            pool,
            sysdns,
            adopt_discovered: config.private_dns.is_empty(),
        })
    }

    /// The shared synthetic address pool
    #[must_use]
    pub fn pool(&self) -> &Arc<LoopbackPool> {
        &self.pool
    }

    /// The bound DNS proxy, for inspecting listen addresses
    #[must_use]
    pub fn dns(&self) -> &DnsProxy {
        &self.dns
    }

    /// Ports the forwarders are bound to
    #[must_use]
    pub fn forwarder_ports(&self) -> Vec<u16> {
        self.forwarders.iter().map(PortForwarder::port).collect()
    }

    /// Start serving
    ///
    /// Repoints the system resolver first, adopting the resolvers it
    /// replaced when the user configured none, then spawns the
    /// forwarder accept loops and finally the DNS interceptor.
    #[must_use]
    pub fn start(self) -> TransproxyHandle {
        let handler = Arc::clone(self.dns.handler());

        let discovered = self.sysdns.setup();
        if self.adopt_discovered && !discovered.is_empty() {
            info!(resolvers = ?discovered, "using discovered private DNS servers");
            handler.resolvers().set_servers(&discovered);
        }
        if handler.resolvers().is_empty() && !handler.rules().zones().is_empty() {
            warn!("no private DNS configured; no-proxy zone queries will fail");
        }

        let (forwarder_shutdown, _) = broadcast::channel(1);

        let mut forwarder_tasks = Vec::with_capacity(self.forwarders.len());
        for forwarder in self.forwarders {
            forwarder_tasks.push(tokio::spawn(
                forwarder.run(forwarder_shutdown.subscribe()),
            ));
        }

        let dns = self.dns.start();

        TransproxyHandle {
            dns,
            forwarder_shutdown,
            forwarder_tasks,
            sysdns: self.sysdns,
        }
    }
}

/// Handle over the running proxy
pub struct TransproxyHandle {
    dns: DnsProxyHandle,
    forwarder_shutdown: broadcast::Sender<()>,
    forwarder_tasks: Vec<JoinHandle<()>>,
    sysdns: Box<dyn SystemDns>,
}

impl TransproxyHandle {
    /// Stop serving: restore system DNS, stop the interceptor, then the
    /// forwarders
    ///
    /// Accept loops close immediately; in-flight tunnels keep draining
    /// until their peers close.
    pub async fn shutdown(self) {
        info!("shutting down");

        self.sysdns.teardown();
        self.dns.shutdown().await;

        let _ = self.forwarder_shutdown.send(());
        for task in self.forwarder_tasks {
            let _ = task.await;
        }
        info!("forwarders stopped");
    }
}
