//! # HTTP Forwarder
//!
//! [`ForwardingEngine`] backed by `reqwest`. Requests are rewritten onto the
//! configured target, sent upstream without following redirects, and the response
//! body is handed back as a byte stream.

use super::ForwardingEngine;
use crate::core::config::UpstreamSettings;
use crate::core::error::{ProxyError, ProxyResult};
use crate::core::types::{OutboundRequest, UpstreamResponse};
use async_trait::async_trait;
use axum::http::header::{HeaderName, HeaderValue, HOST};
use axum::http::{HeaderMap, StatusCode, Uri};
use futures::StreamExt;
use tracing::{debug, warn};
use url::Url;

/// Connection-scoped headers that must not be forwarded in either direction
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name)
}

/// Forwards requests to a single upstream target over HTTP
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    target: Url,
    authority: String,
    host_override: Option<HeaderValue>,
}

impl HttpForwarder {
    /// Create a forwarder for the configured target
    pub fn new(settings: &UpstreamSettings) -> ProxyResult<Self> {
        let target = settings
            .target
            .clone()
            .ok_or_else(|| ProxyError::config("upstream target must be specified"))?;

        let host = target
            .host_str()
            .ok_or_else(|| ProxyError::config("upstream target must include a host"))?;
        let authority = match target.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let host_override = settings
            .host
            .as_deref()
            .map(HeaderValue::from_str)
            .transpose()
            .map_err(|e| ProxyError::config(format!("Invalid host override: {}", e)))?;

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            target,
            authority,
            host_override,
        })
    }

    /// The upstream target
    pub fn target(&self) -> &Url {
        &self.target
    }

    fn target_uri(&self, uri: &Uri) -> ProxyResult<Uri> {
        let path = join_paths(self.target.path(), uri.path());

        let target_query = self.target.query().filter(|q| !q.is_empty());
        let request_query = uri.query().filter(|q| !q.is_empty());
        let path_and_query = match (target_query, request_query) {
            (Some(t), Some(r)) => format!("{}?{}&{}", path, t, r),
            (Some(q), None) | (None, Some(q)) => format!("{}?{}", path, q),
            (None, None) => path,
        };

        Uri::builder()
            .scheme(self.target.scheme())
            .authority(self.authority.as_str())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| ProxyError::invalid_request(format!("Cannot build upstream URI: {}", e)))
    }
}

/// Join two paths with exactly one slash between them
fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

#[async_trait]
impl ForwardingEngine for HttpForwarder {
    fn prepare(&self, request: &mut OutboundRequest) {
        match self.target_uri(&request.uri) {
            Ok(uri) => request.uri = uri,
            Err(e) => warn!(uri = %request.uri, error = %e, "Leaving request URI unchanged"),
        }

        for name in HOP_BY_HOP_HEADERS {
            request.headers.remove(*name);
        }

        match &self.host_override {
            Some(host) => {
                request.headers.insert(HOST, host.clone());
            }
            None => {
                request.headers.remove(HOST);
            }
        }
    }

    async fn forward(&self, request: OutboundRequest) -> ProxyResult<UpstreamResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| ProxyError::invalid_request(format!("Unsupported method: {}", e)))?;

        let mut headers = reqwest::header::HeaderMap::with_capacity(request.headers.len());
        for (name, value) in request.headers.iter() {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
                reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.append(name, value);
            }
        }

        debug!(method = %request.method, uri = %request.uri, "Forwarding request upstream");

        let response = self
            .client
            .request(method, request.uri.to_string())
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| ProxyError::upstream(format!("Request to upstream failed: {}", e)))?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| ProxyError::upstream(format!("Invalid upstream status: {}", e)))?;

        let mut response_headers = HeaderMap::with_capacity(response.headers().len());
        for (name, value) in response.headers().iter() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                response_headers.append(name, value);
            }
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ProxyError::from))
            .boxed();

        Ok(UpstreamResponse::new(status, response_headers, body))
    }
}
