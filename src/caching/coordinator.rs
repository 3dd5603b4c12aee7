//! # Cache Coordinator
//!
//! Request path of the response cache. Each request is keyed and either becomes
//! the owner of a fresh entry (and fetches upstream), joins an in-flight fetch,
//! or replays a fresh ready entry.

use super::entry::{CachedResponse, EntryStatus, EntryWriter};
use super::key::{CacheKey, DefaultKeyDeriver, KeyDeriver};
use super::store::{Acquired, CacheStore};
use super::CacheError;
use crate::core::config::ProxyConfig;
use crate::core::error::{ProxyError, ProxyResult};
use crate::core::types::{OutboundRequest, UpstreamResponse};
use crate::upstream::ForwardingEngine;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// How a request was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Replayed a fresh ready entry
    Hit,
    /// Fetched upstream as the entry owner
    Miss,
    /// Waited on another caller's in-flight fetch
    Coalesced,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Coalesced => "coalesced",
        }
    }
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A response served from the cache
#[derive(Debug, Clone)]
pub struct Served {
    pub key: CacheKey,
    pub response: Arc<CachedResponse>,
    pub outcome: CacheOutcome,
}

impl IntoResponse for Served {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.response.body.clone()));
        *response.status_mut() = self.response.status;
        *response.headers_mut() = self.response.headers.clone();
        response
    }
}

/// Drives lookups, upstream fetches and replays against a [`CacheStore`]
#[derive(Clone)]
pub struct CacheCoordinator {
    store: CacheStore,
    deriver: Arc<dyn KeyDeriver>,
    engine: Arc<dyn ForwardingEngine>,
    ttl: Option<Duration>,
    request_timeout: Duration,
}

impl CacheCoordinator {
    /// Create a coordinator with an empty store and the default key deriver.
    ///
    /// `ttl == None` disables reuse of sealed entries; `request_timeout` bounds
    /// both the owner's fetch and every waiter's wait.
    pub fn new(
        engine: Arc<dyn ForwardingEngine>,
        ttl: Option<Duration>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store: CacheStore::new(),
            deriver: Arc::new(DefaultKeyDeriver::new()),
            engine,
            ttl,
            request_timeout,
        }
    }

    /// Create a coordinator from the proxy configuration
    pub fn from_settings(config: &ProxyConfig, engine: Arc<dyn ForwardingEngine>) -> Self {
        Self::new(engine, config.cache.ttl(), config.server.request_timeout)
    }

    /// Use a different key deriver
    pub fn with_key_deriver(mut self, deriver: Arc<dyn KeyDeriver>) -> Self {
        self.deriver = deriver;
        self
    }

    /// Share an existing store
    pub fn with_store(mut self, store: CacheStore) -> Self {
        self.store = store;
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn engine(&self) -> &Arc<dyn ForwardingEngine> {
        &self.engine
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Answer `request` from the cache, fetching upstream at most once per key
    pub async fn handle(&self, mut request: OutboundRequest) -> ProxyResult<Served> {
        self.engine.prepare(&mut request);
        let key = self.deriver.derive(&request);

        match self.store.get_or_create(key.clone(), self.ttl) {
            Acquired::Created(writer) => {
                // The fetch runs detached so waiters still get a result if this
                // caller goes away.
                let fetch = tokio::spawn(fetch_upstream(
                    Arc::clone(&self.engine),
                    writer,
                    request,
                    self.request_timeout,
                ));

                let response = fetch.await.map_err(|e| {
                    ProxyError::internal(format!("Upstream fetch task failed: {}", e))
                })??;

                Ok(Served {
                    key,
                    response,
                    outcome: CacheOutcome::Miss,
                })
            }
            Acquired::Existing(entry) => {
                let outcome = match entry.status() {
                    EntryStatus::Pending => CacheOutcome::Coalesced,
                    _ => CacheOutcome::Hit,
                };

                let response = entry.wait_timeout(self.request_timeout).await.map_err(|e| {
                    debug!(key = %key, error = %e, "Waiting on cache entry failed");
                    ProxyError::from(e)
                })?;

                Ok(Served {
                    key,
                    response,
                    outcome,
                })
            }
        }
    }
}

impl fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("store", &self.store)
            .field("ttl", &self.ttl)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Owner side of a miss: forward, buffer the whole response, then seal or fail
async fn fetch_upstream(
    engine: Arc<dyn ForwardingEngine>,
    mut writer: EntryWriter,
    request: OutboundRequest,
    limit: Duration,
) -> ProxyResult<Arc<CachedResponse>> {
    let outcome = timeout(limit, async {
        let upstream = engine.forward(request).await?;
        stream_into(&mut writer, upstream).await
    })
    .await;

    match outcome {
        Ok(Ok(())) => Ok(writer.seal()),
        Ok(Err(err)) => {
            warn!(key = %writer.entry().key(), error = %err, "Upstream fetch failed");
            let shared = CacheError::from(&err);
            writer.fail(shared.clone());
            Err(ProxyError::from(shared))
        }
        Err(_) => {
            let waited_ms = limit.as_millis() as u64;
            warn!(key = %writer.entry().key(), waited_ms, "Upstream fetch timed out");
            writer.fail(CacheError::Timeout { waited_ms });
            Err(ProxyError::Timeout {
                timeout_ms: waited_ms,
            })
        }
    }
}

async fn stream_into(writer: &mut EntryWriter, upstream: UpstreamResponse) -> ProxyResult<()> {
    if let Some(length) = upstream.content_length() {
        writer.reserve_body(length);
    }

    let UpstreamResponse {
        status,
        headers,
        mut body,
    } = upstream;
    writer.set_head(status, headers);

    while let Some(chunk) = body.next().await {
        writer.write_chunk(&chunk?);
    }
    Ok(())
}
