//! Error types for rust-transproxy
//!
//! This module defines the error hierarchy for the transparent proxy.
//! Errors are categorized by subsystem; startup errors are fatal while
//! steady-state errors stay local to the query or connection that
//! produced them.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Top-level error type for rust-transproxy
#[derive(Debug, Error)]
pub enum TransproxyError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// DNS interception errors
    #[error("DNS proxy error: {0}")]
    Dns(#[from] DnsProxyError),

    /// Upstream CONNECT tunnel errors
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Port forwarder errors
    #[error("Forwarder error: {0}")]
    Forwarder(#[from] ForwarderError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransproxyError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Dns(e) => e.is_recoverable(),
            Self::Tunnel(e) => e.is_recoverable(),
            Self::Forwarder(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Invalid synthetic address range
    #[error("Invalid IP range '{range}': {reason}")]
    InvalidIpRange { range: String, reason: String },

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create an invalid IP range error
    pub fn ip_range(range: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIpRange {
            range: range.into(),
            reason: reason.into(),
        }
    }
}

/// DNS interception errors
#[derive(Debug, Error)]
pub enum DnsProxyError {
    /// Failed to bind a DNS listener
    #[error("Failed to bind DNS {transport} listener on {addr}: {reason}")]
    Bind {
        transport: &'static str,
        addr: String,
        reason: String,
    },

    /// Failed to decode an inbound DNS message
    #[error("Failed to decode DNS message: {0}")]
    Decode(String),

    /// Failed to encode a DNS response
    #[error("Failed to encode DNS response: {0}")]
    Encode(String),

    /// A private resolver exchange failed
    #[error("DNS exchange with {server} failed: {reason}")]
    Upstream { server: String, reason: String },

    /// A private resolver exchange timed out
    #[error("DNS exchange with {server} timed out after {timeout_secs}s")]
    Timeout { server: String, timeout_secs: u64 },

    /// Every configured private resolver failed
    #[error("No private resolver answered")]
    NoUpstream,

    /// I/O error
    #[error("DNS I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl DnsProxyError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Bind { .. } => false,
            Self::Decode(_) | Self::Encode(_) => true,
            Self::Upstream { .. } | Self::Timeout { .. } | Self::NoUpstream => true,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }

    /// Create a bind error
    pub fn bind(
        transport: &'static str,
        addr: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Bind {
            transport,
            addr: addr.into(),
            reason: reason.into(),
        }
    }

    /// Create an upstream exchange error
    pub fn upstream(server: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Upstream {
            server: server.into(),
            reason: reason.into(),
        }
    }

    /// Check if this is a per-resolver timeout
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Upstream CONNECT tunnel errors
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The proxy URL uses a scheme other than http
    #[error("Unsupported proxy scheme: {0}")]
    UnsupportedScheme(String),

    /// The proxy URL has no host component
    #[error("Proxy URL has no host")]
    MissingHost,

    /// Failed to reach the upstream proxy
    #[error("Failed to connect to upstream proxy {addr}: {reason}")]
    ProxyDial { addr: String, reason: String },

    /// The proxy answered CONNECT with a non-200 status
    #[error("Proxy returned {0}")]
    Status(String),

    /// The CONNECT response head could not be parsed
    #[error("Malformed CONNECT response: {0}")]
    MalformedResponse(String),

    /// The CONNECT handshake exceeded its deadline
    #[error("CONNECT handshake timed out after {timeout_secs}s")]
    HandshakeTimeout { timeout_secs: u64 },

    /// I/O error during the handshake
    #[error("Tunnel I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl TunnelError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::UnsupportedScheme(_) | Self::MissingHost => false,
            Self::ProxyDial { .. }
            | Self::Status(_)
            | Self::MalformedResponse(_)
            | Self::HandshakeTimeout { .. } => true,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }

    /// Create a proxy dial error
    pub fn proxy_dial(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProxyDial {
            addr: addr.into(),
            reason: reason.into(),
        }
    }
}

/// Port forwarder errors
#[derive(Debug, Error)]
pub enum ForwarderError {
    /// Failed to bind the listening socket
    #[error("Failed to bind forwarder on port {port}: {reason}")]
    Bind { port: u16, reason: String },

    /// Failed to accept a connection
    #[error("Accept error on port {port}: {reason}")]
    Accept { port: u16, reason: String },

    /// The accepted connection's local address has no pool binding
    #[error("No binding for local address {addr}")]
    UnknownLocalAddress { addr: SocketAddr },

    /// The accepted connection arrived on a non-IPv4 local address
    #[error("Non-IPv4 local address {addr}")]
    NotIpv4 { addr: SocketAddr },

    /// Opening the upstream tunnel failed
    #[error("Tunnel to {target} failed: {source}")]
    Tunnel {
        target: String,
        #[source]
        source: TunnelError,
    },

    /// I/O error
    #[error("Forwarder I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl ForwarderError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Bind { .. } => false,
            Self::Accept { .. } => true,
            Self::UnknownLocalAddress { .. } | Self::NotIpv4 { .. } => true,
            Self::Tunnel { source, .. } => source.is_recoverable(),
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::ConnectionReset
            ),
        }
    }

    /// Create a bind error
    pub fn bind(port: u16, reason: impl Into<String>) -> Self {
        Self::Bind {
            port,
            reason: reason.into(),
        }
    }

    /// Create an accept error
    pub fn accept(port: u16, reason: impl Into<String>) -> Self {
        Self::Accept {
            port,
            reason: reason.into(),
        }
    }

    /// Create a tunnel error
    pub fn tunnel(target: impl Into<String>, source: TunnelError) -> Self {
        Self::Tunnel {
            target: target.into(),
            source,
        }
    }
}

/// Type alias for Result with TransproxyError
pub type Result<T> = std::result::Result<T, TransproxyError>;
