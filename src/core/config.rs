//! # Configuration Module
//!
//! This module handles configuration loading for the proxy. It provides the
//! configuration structures and the loading mechanisms.
//!
//! ## Key Features
//! - YAML configuration parsing with serde
//! - Environment variable override support
//! - Validation that reports every problem at once

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use url::Url;

use crate::core::error::{ProxyError, ProxyResult};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "PROXY_CONFIG_PATH";

/// Configuration file used when `PROXY_CONFIG_PATH` is not set
pub const DEFAULT_CONFIG_PATH: &str = "config/proxy.yaml";

/// Main proxy configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration
    pub server: ServerSettings,

    /// Upstream target configuration
    pub upstream: UpstreamSettings,

    /// Response cache configuration
    pub cache: CacheSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

impl ProxyConfig {
    /// Load configuration from the file named by `PROXY_CONFIG_PATH`.
    ///
    /// A missing file is not an error: built-in defaults are used and the
    /// environment overrides still apply.
    pub async fn load() -> ProxyResult<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut config = if Path::new(&path).exists() {
            Self::read_yaml(&path).await?
        } else {
            info!(path = %path, "Configuration file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ProxyResult<Self> {
        let mut config = Self::read_yaml(path).await?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document without touching the environment
    pub fn from_yaml_str(content: &str) -> ProxyResult<Self> {
        let config: ProxyConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    async fn read_yaml<P: AsRef<Path>>(path: P) -> ProxyResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: PROXY_<SECTION>_<FIELD>
    pub fn apply_env_overrides(&mut self) -> ProxyResult<()> {
        use std::env;

        if let Ok(addresses) = env::var("PROXY_SERVER_ADDRESSES") {
            self.server.addresses = addresses
                .split(',')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
        }

        if let Ok(timeout) = env::var("PROXY_SERVER_REQUEST_TIMEOUT") {
            self.server.request_timeout = humantime::parse_duration(&timeout)
                .map_err(|e| ProxyError::config(format!("Invalid PROXY_SERVER_REQUEST_TIMEOUT: {}", e)))?;
        }

        if let Ok(target) = env::var("PROXY_UPSTREAM_TARGET") {
            let url = Url::parse(&target)
                .map_err(|e| ProxyError::config(format!("Invalid PROXY_UPSTREAM_TARGET: {}", e)))?;
            self.upstream.target = Some(url);
        }

        if let Ok(host) = env::var("PROXY_UPSTREAM_HOST") {
            self.upstream.host = if host.is_empty() { None } else { Some(host) };
        }

        if let Ok(enabled) = env::var("PROXY_CACHE_ENABLED") {
            self.cache.enabled = enabled
                .parse()
                .map_err(|e| ProxyError::config(format!("Invalid PROXY_CACHE_ENABLED: {}", e)))?;
        }

        if let Ok(ttl) = env::var("PROXY_CACHE_TTL") {
            self.cache.ttl_secs = ttl
                .parse()
                .map_err(|e| ProxyError::config(format!("Invalid PROXY_CACHE_TTL: {}", e)))?;
        }

        if let Ok(level) = env::var("PROXY_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = env::var("PROXY_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(ProxyError::config(format!(
                        "Invalid PROXY_LOG_FORMAT: {}",
                        other
                    )))
                }
            };
        }

        if let Ok(enabled) = env::var("PROXY_LOG_REQUESTS") {
            self.logging.log_requests = enabled
                .parse()
                .map_err(|e| ProxyError::config(format!("Invalid PROXY_LOG_REQUESTS: {}", e)))?;
        }

        Ok(())
    }

    /// Configuration validation with detailed error messages
    pub fn validate(&self) -> ProxyResult<()> {
        let mut errors = Vec::new();

        if self.server.addresses.is_empty() {
            errors.push("at least one listen address must be configured".to_string());
        }

        for address in &self.server.addresses {
            if let Err(e) = parse_listen_address(address) {
                errors.push(e.to_string());
            }
        }

        if self.server.request_timeout.is_zero() {
            errors.push("request_timeout must be greater than 0".to_string());
        }

        if self.server.max_body_size == 0 {
            errors.push("max_body_size must be greater than 0".to_string());
        }

        match &self.upstream.target {
            None => errors.push("upstream target must be specified".to_string()),
            Some(target) => {
                if !matches!(target.scheme(), "http" | "https") {
                    errors.push(format!("unsupported upstream scheme: {}", target.scheme()));
                }
                if target.host_str().is_none() {
                    errors.push("upstream target must include a host".to_string());
                }
            }
        }

        if let Some(host) = &self.upstream.host {
            if axum::http::HeaderValue::from_str(host).is_err() {
                errors.push(format!("host override is not a valid header value: {}", host));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProxyError::config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }

    /// Parsed listen addresses
    pub fn listen_addresses(&self) -> ProxyResult<Vec<SocketAddr>> {
        self.server
            .addresses
            .iter()
            .map(|a| parse_listen_address(a))
            .collect()
    }
}

/// Parse a listen address, accepting the `":8080"` shorthand for all interfaces
pub fn parse_listen_address(address: &str) -> ProxyResult<SocketAddr> {
    let normalized = if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    };

    normalized
        .parse()
        .map_err(|e| ProxyError::config(format!("Invalid listen address {}: {}", address, e)))
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Addresses to listen on; all share one response cache
    pub addresses: Vec<String>,

    /// Deadline for a single proxied request, including waits on in-flight fetches
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Maximum inbound request body size
    pub max_body_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addresses: vec![":8080".to_string()],
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Upstream target configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// Origin every request is forwarded to
    pub target: Option<Url>,

    /// Host header sent upstream instead of the target's own host
    pub host: Option<String>,

    /// Connection establishment timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            target: None,
            host: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Serve responses through the cache instead of passing them through
    pub enabled: bool,

    /// Freshness lifetime in seconds. Zero or negative disables reuse of sealed
    /// entries; concurrent requests still share one in-flight fetch.
    pub ttl_secs: i64,
}

impl CacheSettings {
    /// Freshness lifetime, or `None` when sealed entries must not be reused
    pub fn ttl(&self) -> Option<Duration> {
        if self.ttl_secs > 0 {
            Some(Duration::from_secs(self.ttl_secs as u64))
        } else {
            None
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: -1,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level
    pub level: String,

    /// Log format
    pub format: LogFormat,

    /// Emit one log line per proxied request
    pub log_requests: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            log_requests: false,
        }
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}
