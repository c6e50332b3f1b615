//! Configuration loading
//!
//! The configuration comes from a JSON file when one exists; otherwise
//! it is assembled from the conventional `http_proxy` and `no_proxy`
//! environment variables, mirroring how the proxy is usually deployed on
//! locked-down machines. A few `TRANSPROXY_*` variables override either
//! source.

use std::path::Path;

use tracing::debug;

use super::types::Config;
use crate::error::ConfigError;

/// Load and validate configuration, falling back to the environment
///
/// # Errors
///
/// Returns `ConfigError` when the file cannot be parsed, when neither
/// source yields a proxy URL, or when validation fails.
pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    let mut config = if path.exists() {
        load_file(path)?
    } else {
        debug!(path = %path.display(), "no config file, using environment");
        from_env()?
    };

    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;
    load_str(&contents)
}

/// Parse configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError::ParseError` on malformed JSON.
pub fn load_str(json: &str) -> Result<Config, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Assemble configuration from `http_proxy` and `no_proxy`
fn from_env() -> Result<Config, ConfigError> {
    let proxy_url = std::env::var("http_proxy")
        .or_else(|_| std::env::var("HTTP_PROXY"))
        .map_err(|_| ConfigError::EnvError {
            name: "http_proxy".into(),
            reason: "not set and no configuration file found".into(),
        })?;

    let no_proxy = std::env::var("no_proxy")
        .or_else(|_| std::env::var("NO_PROXY"))
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(Config {
        proxy_url,
        no_proxy,
        ..Config::default_config()
    })
}

/// Apply `TRANSPROXY_*` overrides on top of the loaded config
fn apply_env_overrides(config: &mut Config) {
    if let Ok(url) = std::env::var("TRANSPROXY_PROXY_URL") {
        debug!("proxy_url overridden from environment");
        config.proxy_url = url;
    }
    if let Ok(level) = std::env::var("TRANSPROXY_LOG_LEVEL") {
        debug!(level = %level, "log level overridden from environment");
        config.log.level = level;
    }
    if let Ok(addr) = std::env::var("TRANSPROXY_DNS_LISTEN") {
        debug!(addr = %addr, "dns_listen overridden from environment");
        config.dns_listen = addr;
    }
}
