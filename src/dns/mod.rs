//! DNS interception
//!
//! This module turns the system resolver into the redirection fabric's
//! entry point. Public names are answered with synthetic loopback
//! addresses drawn from a bounded ring ([`pool`]); names inside a
//! configured no-proxy zone are forwarded verbatim to private resolvers
//! with failover ([`upstream`]). The bidirectional domain/IP binding the
//! pool maintains is what lets the port forwarder turn an accepted
//! connection's local address back into a hostname.
//!
//! Both DNS transports serve the same handler:
//!
//! ```text
//! client query ──UDP/53──▶ DnsUdpServer ─┐
//!                                        ├─▶ DnsHandler ─▶ pool / private DNS
//! client query ──TCP/53──▶ DnsTcpServer ─┘
//! ```

pub mod handler;
pub mod pool;
pub mod server;
mod tcp_server;
mod udp_server;
pub mod upstream;

pub use handler::{DnsHandler, SYNTHETIC_TTL};
pub use pool::{parse_ip_range, IpRange, LoopbackPool};
pub use server::{DnsProxy, DnsProxyBuilder, DnsProxyHandle};
pub use tcp_server::DnsTcpServer;
pub use udp_server::DnsUdpServer;
pub use upstream::{PrivateResolvers, Transport, UPSTREAM_TIMEOUT};
