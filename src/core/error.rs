//! # Error Handling Module
//!
//! This module provides the error type shared by every layer of the proxy using the
//! `thiserror` crate. Each variant maps onto the HTTP status code that the client of
//! the proxy receives when that failure ends a request.
//!
//! Upstream and I/O failures are always recovered locally: they become a failed
//! response for the request that hit them and never abort the serving task.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the proxy
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Error types for the caching proxy
#[derive(Debug, Error, Clone)]
pub enum ProxyError {
    /// Configuration-related errors (invalid config, missing target, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The forwarding engine could not obtain a usable upstream response
    #[error("Upstream error: {message}")]
    Upstream { message: String },

    /// Upstream fetch or wait on an in-flight fetch exceeded the request deadline
    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The inbound request could not be turned into an outbound one
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, listener binding, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// HTTP client errors raised while talking to the upstream
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },
}

impl ProxyError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an upstream error with a custom message
    pub fn upstream<S: Into<String>>(message: S) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an invalid request error with a custom reason
    pub fn invalid_request<S: Into<String>>(reason: S) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Get the HTTP status code returned to the client for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::HttpClient { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Upstream { .. } => "upstream_error",
            Self::Timeout { .. } => "timeout",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Yaml { .. } => "yaml_error",
            Self::HttpClient { .. } => "http_client_error",
        }
    }

    /// Whether the failure came from the upstream side of the proxy
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            Self::Upstream { .. } | Self::HttpClient { .. } | Self::Timeout { .. }
        )
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ProxyError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpClient {
            message: err.to_string(),
        }
    }
}

/// Lets axum handlers return `ProxyResult` directly; the client gets the mapped
/// status code and a small JSON error document.
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status, Json(error_response)).into_response()
    }
}
