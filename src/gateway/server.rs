//! # HTTP Server Module
//!
//! Axum front end of the proxy. Every method and path lands on a single fallback
//! handler, which buffers the inbound body and hands the request to the selected
//! [`ResponseStrategy`]: replay through the response cache, or stream straight
//! from the upstream.
//!
//! One listener is bound per configured address. All listeners share the same
//! strategy, and therefore the same cache.

use crate::caching::{CacheCoordinator, CacheOutcome, CacheStats};
use crate::core::config::ProxyConfig;
use crate::core::error::{ProxyError, ProxyResult};
use crate::core::types::{OutboundRequest, UpstreamResponse};
use crate::upstream::ForwardingEngine;
use axum::{
    body::Body,
    extract::{Request, State},
    response::{IntoResponse, Response},
    Router as AxumRouter,
};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

/// How the proxy produces a response for a forwarded request
#[derive(Clone)]
pub enum ResponseStrategy {
    /// Coalesce and cache upstream responses
    Cached(CacheCoordinator),

    /// Forward every request and stream the response through
    Passthrough(Arc<dyn ForwardingEngine>),
}

impl ResponseStrategy {
    /// Pick the strategy the configuration asks for
    pub fn from_config(config: &ProxyConfig, engine: Arc<dyn ForwardingEngine>) -> Self {
        if config.cache.enabled {
            Self::Cached(CacheCoordinator::from_settings(config, engine))
        } else {
            Self::Passthrough(engine)
        }
    }

    /// Cache statistics, when caching is enabled
    pub fn cache_stats(&self) -> Option<CacheStats> {
        match self {
            Self::Cached(coordinator) => Some(coordinator.store().stats()),
            Self::Passthrough(_) => None,
        }
    }

    /// Produce a response, along with the cache outcome when caching is enabled
    pub async fn respond(
        &self,
        request: OutboundRequest,
    ) -> ProxyResult<(Response, Option<CacheOutcome>)> {
        match self {
            Self::Cached(coordinator) => {
                let served = coordinator.handle(request).await?;
                let outcome = served.outcome;
                Ok((served.into_response(), Some(outcome)))
            }
            Self::Passthrough(engine) => {
                let mut request = request;
                engine.prepare(&mut request);
                let upstream = engine.forward(request).await?;
                Ok((stream_response(upstream), None))
            }
        }
    }
}

impl fmt::Debug for ResponseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cached(coordinator) => f.debug_tuple("Cached").field(coordinator).finish(),
            Self::Passthrough(_) => f.write_str("Passthrough"),
        }
    }
}

fn stream_response(upstream: UpstreamResponse) -> Response {
    let UpstreamResponse {
        status,
        headers,
        body,
    } = upstream;

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Server state shared by all handlers
#[derive(Clone, Debug)]
struct ServerState {
    strategy: ResponseStrategy,
    max_body_size: usize,
    log_requests: bool,
}

/// The proxy's HTTP server
#[derive(Debug)]
pub struct ProxyServer {
    addresses: Vec<SocketAddr>,
    state: ServerState,
}

impl ProxyServer {
    /// Create a server that forwards through `engine`
    pub fn new(config: &ProxyConfig, engine: Arc<dyn ForwardingEngine>) -> ProxyResult<Self> {
        let addresses = config.listen_addresses()?;
        let strategy = ResponseStrategy::from_config(config, engine);

        match &strategy {
            ResponseStrategy::Cached(coordinator) => match coordinator.ttl() {
                Some(ttl) => info!("Response cache enabled with TTL {:?}", ttl),
                None => info!("Response cache enabled without reuse of sealed entries"),
            },
            ResponseStrategy::Passthrough(_) => info!("Response cache disabled"),
        }

        Ok(Self {
            addresses,
            state: ServerState {
                strategy,
                max_body_size: config.server.max_body_size,
                log_requests: config.logging.log_requests,
            },
        })
    }

    /// Build the router serving every path and method
    pub fn router(&self) -> AxumRouter {
        AxumRouter::new()
            .fallback(handle_request)
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Addresses the server listens on
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    /// The active response strategy
    pub fn strategy(&self) -> &ResponseStrategy {
        &self.state.strategy
    }

    /// Bind every address and serve until one listener fails
    #[instrument(skip(self))]
    pub async fn start(self) -> ProxyResult<()> {
        let app = self.router();
        let mut servers = Vec::with_capacity(self.addresses.len());

        for addr in &self.addresses {
            let listener = TcpListener::bind(addr).await.map_err(|e| ProxyError::Io {
                message: format!("Failed to bind proxy server to {}: {}", addr, e),
            })?;
            info!("Proxy server listening on {}", addr);

            let app = app.clone();
            let addr = *addr;
            servers.push(async move {
                axum::serve(listener, app).await.map_err(|e| {
                    warn!("Proxy server on {} failed: {}", addr, e);
                    ProxyError::from(e)
                })
            });
        }

        futures::future::try_join_all(servers).await?;
        Ok(())
    }
}

/// Fallback handler: every inbound request is proxied
async fn handle_request(State(state): State<ServerState>, request: Request) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            return ProxyError::invalid_request(format!("Failed to read request body: {}", e))
                .into_response();
        }
    };

    let method = parts.method.clone();
    let uri = parts.uri.clone();
    let outbound = OutboundRequest::new(parts.method, parts.uri)
        .with_headers(parts.headers)
        .with_body(body);

    debug!(method = %method, uri = %uri, "Proxying request");

    match state.strategy.respond(outbound).await {
        Ok((response, outcome)) => {
            if state.log_requests {
                info!(
                    status = response.status().as_u16(),
                    cache = outcome.map(|o| o.as_str()).unwrap_or("bypass"),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "{} {}",
                    method,
                    uri
                );
            }
            response
        }
        Err(err) => {
            warn!(
                method = %method,
                uri = %uri,
                error = %err,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Proxy request failed"
            );
            err.into_response()
        }
    }
}
