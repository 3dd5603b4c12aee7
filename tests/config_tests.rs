//! Configuration loading tests

use caching_proxy::core::config::LogFormat;
use caching_proxy::{ProxyConfig, ProxyError};
use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_load_from_file() {
    let file = write_config(
        r#"
server:
  addresses: [":9000", "127.0.0.1:9001"]
  request_timeout: 2s
upstream:
  target: https://origin.example.com/base
  host: public.example.com
cache:
  enabled: true
  ttl_secs: 30
logging:
  format: json
"#,
    );

    let config = ProxyConfig::load_from_file(file.path()).await.unwrap();

    assert_eq!(config.server.request_timeout, Duration::from_secs(2));
    let expected: Vec<SocketAddr> = vec![
        "0.0.0.0:9000".parse().unwrap(),
        "127.0.0.1:9001".parse().unwrap(),
    ];
    assert_eq!(config.listen_addresses().unwrap(), expected);
    assert_eq!(
        config.upstream.target.as_ref().unwrap().as_str(),
        "https://origin.example.com/base"
    );
    assert_eq!(config.upstream.host.as_deref(), Some("public.example.com"));
    assert!(config.cache.enabled);
    assert_eq!(config.cache.ttl(), Some(Duration::from_secs(30)));
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[tokio::test]
async fn test_invalid_file_is_rejected() {
    let file = write_config("upstream:\n  target: ftp://origin.example.com\n");
    let err = ProxyConfig::load_from_file(file.path()).await.unwrap_err();
    assert!(matches!(err, ProxyError::Configuration { .. }));
}

#[tokio::test]
async fn test_missing_file_is_an_error() {
    let err = ProxyConfig::load_from_file("/nonexistent/proxy.yaml")
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::Io { .. }));
    assert_eq!(err.error_type(), "io_error");
}

#[tokio::test]
async fn test_malformed_file_is_a_yaml_error() {
    let file = write_config("upstream: [target\n");
    let err = ProxyConfig::load_from_file(file.path()).await.unwrap_err();
    assert!(matches!(err, ProxyError::Yaml { .. }));
}
