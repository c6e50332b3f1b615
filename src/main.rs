//! rust-transproxy: transparent forwarding proxy over HTTP CONNECT
//!
//! # Usage
//!
//! ```bash
//! # Run with the default configuration file
//! sudo ./rust-transproxy
//!
//! # Run with a custom configuration
//! sudo ./rust-transproxy -c /path/to/config.json
//!
//! # No file at all: http_proxy / no_proxy from the environment
//! http_proxy=http://prx:3128 sudo -E ./rust-transproxy
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use rust_transproxy::config::{self, Config};
use rust_transproxy::supervisor::Transproxy;

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("rust-transproxy v{}", rust_transproxy::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"rust-transproxy v{}

Transparent forwarding proxy for machines behind an upstream HTTP CONNECT proxy.

USAGE:
    rust-transproxy [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: config.json]
    -g, --generate-config   Print a default configuration and exit
    --check                 Check configuration and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    http_proxy              Upstream proxy URL when no config file exists
    no_proxy                Comma-separated no-proxy items
    TRANSPROXY_PROXY_URL    Override the proxy URL
    TRANSPROXY_LOG_LEVEL    Override the log level
    TRANSPROXY_DNS_LISTEN   Override the DNS bind address
    RUST_LOG                Fine-grained tracing filter (takes precedence)

The process needs to bind port 53 and the configured listen ports, so it
typically runs with elevated privileges."#,
        rust_transproxy::VERSION
    );
}

/// Initialize logging from the configured level
///
/// `RUST_LOG` takes precedence over the config file setting.
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Wait for SIGTERM
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_config {
        println!(
            "{}",
            serde_json::to_string_pretty(&Config::default_config())?
        );
        return Ok(());
    }

    let config = config::load(&args.config_path)
        .with_context(|| format!("loading configuration from {:?}", args.config_path))?;

    if args.check_config {
        println!("Configuration OK");
        return Ok(());
    }

    init_logging(&config);
    info!(version = rust_transproxy::VERSION, "rust-transproxy starting");

    let proxy = Transproxy::bind(&config)
        .await
        .context("binding listeners")?;
    let handle = proxy.start();

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received SIGINT, stopping");
        }
        () = wait_for_sigterm() => {
            info!("received SIGTERM, stopping");
        }
    }

    handle.shutdown().await;
    info!("rust-transproxy exited");

    Ok(())
}
