//! # Core Types
//!
//! Request and response shapes exchanged between the server, the response
//! cache and the forwarding engine.

use axum::http::{HeaderMap, Method, StatusCode, Uri};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;

use crate::core::error::ProxyError;

/// Streamed upstream response body
pub type BodyStream = BoxStream<'static, Result<Bytes, ProxyError>>;

/// A request about to be sent upstream
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// HTTP method
    pub method: Method,

    /// Request URI; absolute once the forwarding engine has prepared it
    pub uri: Uri,

    /// Request headers
    pub headers: HeaderMap,

    /// Buffered request body
    pub body: Bytes,
}

impl OutboundRequest {
    /// Create a request with no headers and an empty body
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Replace the request headers
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Replace the request body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// What the forwarding engine hands back for one upstream call
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl UpstreamResponse {
    /// Create a response from a streamed body
    pub fn new(status: StatusCode, headers: HeaderMap, body: BodyStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Create a response whose body is already fully available
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        let stream = if body.is_empty() {
            stream::empty().boxed()
        } else {
            stream::once(async move { Ok(body) }).boxed()
        };
        Self::new(status, headers, stream)
    }

    /// Declared body length, if the upstream sent a usable Content-Length
    pub fn content_length(&self) -> Option<usize> {
        self.headers
            .get(axum::http::header::CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .parse()
            .ok()
    }
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}
