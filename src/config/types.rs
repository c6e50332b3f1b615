//! Configuration types for rust-transproxy
//!
//! Configuration is loaded from a JSON file or assembled from the
//! standard `http_proxy`/`no_proxy` environment variables, then
//! validated once at startup.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::dns::pool::parse_ip_range;
use crate::error::ConfigError;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Upstream HTTP proxy URL, `http://[user:pass@]host[:port]`
    pub proxy_url: String,

    /// No-proxy items: literal IPv4 addresses, CIDRs, or domain suffixes
    #[serde(default)]
    pub no_proxy: Vec<String>,

    /// Private resolvers (`IP[:port]`) for no-proxy zones
    #[serde(default)]
    pub private_dns: Vec<String>,

    /// TCP ports to intercept
    #[serde(default = "default_listen_ports")]
    pub listen_ports: Vec<u16>,

    /// Bind address for the DNS server; `":53"` binds all interfaces
    #[serde(default = "default_dns_listen")]
    pub dns_listen: String,

    /// Serve DNS over UDP
    #[serde(default = "default_true")]
    pub dns_udp: bool,

    /// Serve DNS over TCP
    #[serde(default = "default_true")]
    pub dns_tcp: bool,

    /// Synthetic loopback pool, `"startIP-endIP"` inside 127.0.0.0/8
    #[serde(default = "default_ip_range")]
    pub ip_range: String,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.proxy_url).map_err(|e| {
            ConfigError::validation(format!("invalid proxy_url '{}': {e}", self.proxy_url))
        })?;
        if url.scheme() != "http" {
            return Err(ConfigError::validation(format!(
                "proxy_url must use the http scheme, got '{}'",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(ConfigError::validation("proxy_url has no host"));
        }

        parse_ip_range(&self.ip_range)?;

        if self.listen_ports.is_empty() {
            return Err(ConfigError::validation(
                "at least one listen port must be configured",
            ));
        }
        if self.listen_ports.contains(&0) {
            return Err(ConfigError::validation("listen port 0 is not allowed"));
        }

        if !self.dns_udp && !self.dns_tcp {
            return Err(ConfigError::validation(
                "at least one DNS transport must be enabled",
            ));
        }

        self.dns_listen_addr()?;

        Ok(())
    }

    /// The parsed proxy URL
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the URL fails to parse; `validate` makes
    /// this unreachable on validated configs.
    pub fn proxy_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.proxy_url).map_err(|e| {
            ConfigError::validation(format!("invalid proxy_url '{}': {e}", self.proxy_url))
        })
    }

    /// The DNS bind address with the `":port"` shorthand expanded
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the address does not parse.
    pub fn dns_listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = if self.dns_listen.starts_with(':') {
            format!("0.0.0.0{}", self.dns_listen)
        } else {
            self.dns_listen.clone()
        };
        addr.parse().map_err(|_| {
            ConfigError::validation(format!("invalid dns_listen address '{}'", self.dns_listen))
        })
    }

    /// A default configuration with a placeholder proxy
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            proxy_url: "http://proxy.example.com:3128".into(),
            no_proxy: Vec::new(),
            private_dns: Vec::new(),
            listen_ports: default_listen_ports(),
            dns_listen: default_dns_listen(),
            dns_udp: true,
            dns_tcp: true,
            ip_range: default_ip_range(),
            log: LogConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level: debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_listen_ports() -> Vec<u16> {
    vec![80, 443, 22]
}

fn default_dns_listen() -> String {
    ":53".into()
}

fn default_ip_range() -> String {
    "127.0.1.0-127.0.255.255".into()
}

fn default_log_level() -> String {
    "info".into()
}
