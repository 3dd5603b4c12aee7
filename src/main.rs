//! # Caching Proxy - Main Entry Point
//!
//! Loads the configuration, installs logging, and serves until the listeners
//! fail or the process receives Ctrl-C.
//!
//! The configuration file is read from `PROXY_CONFIG_PATH` (default
//! `config/proxy.yaml`); `PROXY_*` environment variables override it.

use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use caching_proxy::core::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use caching_proxy::observability::{init_logging, metrics};
use caching_proxy::{HttpForwarder, ProxyConfig, ProxyServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = ProxyConfig::load()
        .await
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    init_logging(&config.logging).context("failed to initialize logging")?;
    metrics::describe_metrics();

    info!("Starting caching proxy {}", env!("CARGO_PKG_VERSION"));

    let forwarder = HttpForwarder::new(&config.upstream).context("failed to create forwarder")?;
    info!("Forwarding to {}", forwarder.target());

    let server = ProxyServer::new(&config, Arc::new(forwarder)).context("failed to create server")?;

    tokio::select! {
        result = server.start() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e).context("proxy server stopped");
            }
        }
        result = signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
        }
    }

    info!("Caching proxy shutdown complete");
    Ok(())
}
