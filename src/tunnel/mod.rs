//! Upstream CONNECT tunneling
//!
//! The port forwarder obtains its upstream byte streams here: a forward
//! TCP dial to the configured proxy followed by an HTTP/1.1 CONNECT
//! handshake that repurposes the socket as a raw tunnel.

pub mod dialer;
pub mod http_connect;

pub use dialer::{Dialer, KeepaliveDialer, DEFAULT_KEEPALIVE};
pub use http_connect::{HttpTunnelDialer, HANDSHAKE_TIMEOUT};
