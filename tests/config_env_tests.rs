//! Environment override tests
//!
//! Kept in their own test binary so the process environment is not shared
//! with the file loading tests running on other threads.

use caching_proxy::core::config::LogFormat;
use caching_proxy::{ProxyConfig, ProxyError};
use std::env;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const BASE: &str = r#"
upstream:
  target: http://origin.local
  host: example.com
cache:
  enabled: false
  ttl_secs: 60
logging:
  level: info
  log_requests: false
"#;

const VARS: &[&str] = &[
    "PROXY_CACHE_TTL",
    "PROXY_CACHE_ENABLED",
    "PROXY_UPSTREAM_HOST",
    "PROXY_LOG_REQUESTS",
    "PROXY_LOG_LEVEL",
    "PROXY_LOG_FORMAT",
];

fn clear_vars() {
    for var in VARS {
        env::remove_var(var);
    }
}

fn overridden(vars: &[(&str, &str)]) -> Result<ProxyConfig, ProxyError> {
    clear_vars();
    for (name, value) in vars {
        env::set_var(name, value);
    }

    let mut config = ProxyConfig::from_yaml_str(BASE).unwrap();
    let result = config.apply_env_overrides().map(|_| config);
    clear_vars();
    result
}

// A single test drives every scenario so no two threads touch the environment
#[tokio::test]
async fn test_environment_overrides() {
    let config = overridden(&[]).unwrap();
    assert!(!config.cache.enabled);
    assert_eq!(config.cache.ttl(), Some(Duration::from_secs(60)));
    assert_eq!(config.upstream.host.as_deref(), Some("example.com"));

    let config = overridden(&[
        ("PROXY_CACHE_ENABLED", "true"),
        ("PROXY_CACHE_TTL", "120"),
        ("PROXY_LOG_REQUESTS", "true"),
        ("PROXY_LOG_LEVEL", "debug"),
        ("PROXY_LOG_FORMAT", "JSON"),
    ])
    .unwrap();
    assert!(config.cache.enabled);
    assert_eq!(config.cache.ttl_secs, 120);
    assert_eq!(config.cache.ttl(), Some(Duration::from_secs(120)));
    assert!(config.logging.log_requests);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Json);

    // Zero and negative TTLs disable reuse of sealed entries
    let config = overridden(&[("PROXY_CACHE_TTL", "-5")]).unwrap();
    assert_eq!(config.cache.ttl_secs, -5);
    assert_eq!(config.cache.ttl(), None);
    let config = overridden(&[("PROXY_CACHE_TTL", "0")]).unwrap();
    assert_eq!(config.cache.ttl(), None);

    // An empty host clears the override
    let config = overridden(&[("PROXY_UPSTREAM_HOST", "")]).unwrap();
    assert_eq!(config.upstream.host, None);
    let config = overridden(&[("PROXY_UPSTREAM_HOST", "other.example.com")]).unwrap();
    assert_eq!(config.upstream.host.as_deref(), Some("other.example.com"));

    for (name, value) in [
        ("PROXY_CACHE_TTL", "soon"),
        ("PROXY_CACHE_ENABLED", "maybe"),
        ("PROXY_LOG_REQUESTS", "yes please"),
        ("PROXY_LOG_FORMAT", "xml"),
    ] {
        let err = overridden(&[(name, value)]).unwrap_err();
        assert!(matches!(err, ProxyError::Configuration { .. }), "{}={}", name, value);
        assert!(err.to_string().contains(name));
    }

    // Overrides apply on top of a loaded file
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"upstream:\n  target: http://origin.local\n").unwrap();

    env::set_var("PROXY_SERVER_REQUEST_TIMEOUT", "750ms");
    env::set_var("PROXY_LOG_LEVEL", "debug");
    let config = ProxyConfig::load_from_file(file.path()).await;
    env::remove_var("PROXY_SERVER_REQUEST_TIMEOUT");
    clear_vars();

    let config = config.unwrap();
    assert_eq!(config.server.request_timeout, Duration::from_millis(750));
    assert_eq!(config.logging.level, "debug");
}
