//! rust-transproxy: transparent forwarding proxy over HTTP CONNECT
//!
//! This crate makes outbound TCP connections on a client machine
//! transparently traverse an upstream HTTP proxy, without touching
//! firewall rules or per-application settings. It conscripts the system
//! DNS resolver: public names are answered with synthetic loopback
//! addresses, and a connection to such an address is reverse-mapped back
//! to the hostname and tunneled through the proxy with CONNECT.
//!
//! # Architecture
//!
//! ```text
//! app ── DNS query ──▶ DNS interceptor ──▶ 127.0.17.42 (synthetic)
//! app ── TCP 127.0.17.42:443 ──▶ port forwarder
//!          │  reverse-lookup(127.0.17.42) = example.com
//!          └─▶ CONNECT example.com:443 via upstream proxy ──▶ tunnel
//! ```
//!
//! Names inside configured no-proxy zones bypass the pool entirely and
//! are forwarded to private resolvers.
//!
//! # Quick Start
//!
//! ```no_run
//! use rust_transproxy::config;
//! use rust_transproxy::supervisor::Transproxy;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = config::load("config.json")?;
//! let proxy = Transproxy::bind(&config).await?;
//! let handle = proxy.start();
//! // ... wait for a signal ...
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`dns`]: DNS interception, synthetic pool, private resolver failover
//! - [`error`]: Error types
//! - [`forwarder`]: Per-port TCP acceptor and tunnel stitching
//! - [`io`]: Bidirectional tunnel byte pump
//! - [`rules`]: No-proxy rule set
//! - [`supervisor`]: Component wiring and cooperative shutdown
//! - [`sysdns`]: Platform DNS client seam
//! - [`tunnel`]: HTTP CONNECT dialer

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod dns;
pub mod error;
pub mod forwarder;
pub mod io;
pub mod rules;
pub mod supervisor;
pub mod sysdns;
pub mod tunnel;

// Re-export commonly used types at the crate root
pub use config::{Config, LogConfig};
pub use dns::{
    parse_ip_range, DnsHandler, DnsProxy, DnsProxyBuilder, DnsProxyHandle, DnsTcpServer,
    DnsUdpServer, IpRange, LoopbackPool, PrivateResolvers, Transport, SYNTHETIC_TTL,
    UPSTREAM_TIMEOUT,
};
pub use error::{
    ConfigError, DnsProxyError, ForwarderError, Result, TransproxyError, TunnelError,
};
pub use forwarder::PortForwarder;
pub use io::{tunnel_copy, CopyResult};
pub use rules::NoProxy;
pub use supervisor::{Transproxy, TransproxyHandle};
pub use sysdns::{NoopSystemDns, SystemDns};
pub use tunnel::{Dialer, HttpTunnelDialer, KeepaliveDialer, DEFAULT_KEEPALIVE, HANDSHAKE_TIMEOUT};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
