//! # Cache Entry State Machine
//!
//! A [`CacheEntry`] is the cached (or in-progress) response for one key. It moves
//! `Pending -> Ready` when the upstream fetch succeeds and `Pending -> Failed`
//! when it does not; both are terminal. A stale entry is replaced wholesale by the
//! store, never reset to `Pending`.
//!
//! Only the task holding the entry's [`EntryWriter`] may populate it. The writer
//! buffers status, headers and body privately and publishes them in one step when
//! it seals the entry, so a waiter can never observe a partially written body.
//!
//! Completion is broadcast through a `tokio::sync::watch` channel. The terminal
//! state is stored in the channel itself, so a caller that joins after completion
//! reads it immediately and no waiter can miss the signal. The channel's internal
//! lock orders the owner's writes before every waiter's read.

use super::body::BodyBuffer;
use super::key::CacheKey;
use super::store::CacheStore;
use super::{CacheError, CacheResult};
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Observable lifecycle state of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Ready,
    Failed,
}

/// A sealed upstream response, immutable and shareable between replays
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResponse {
    /// Create a sealed response
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// A fresh reader over the body; every call starts from the first byte
    pub fn body_reader(&self) -> Cursor<Bytes> {
        Cursor::new(self.body.clone())
    }
}

#[derive(Debug, Clone)]
enum EntryState {
    Pending,
    Ready(Arc<CachedResponse>),
    Failed(CacheError),
}

/// Cached or in-flight response for a single key
#[derive(Debug)]
pub struct CacheEntry {
    key: CacheKey,
    created_at: Instant,
    ttl: Option<Duration>,
    state: watch::Sender<EntryState>,
}

impl CacheEntry {
    /// Create a pending entry. `ttl == None` means the sealed response is only
    /// shared with callers that joined while it was pending.
    pub(crate) fn new(key: CacheKey, ttl: Option<Duration>) -> Self {
        let (state, _) = watch::channel(EntryState::Pending);
        Self {
            key,
            created_at: Instant::now(),
            ttl,
            state,
        }
    }

    /// Key this entry is stored under
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// When the entry was created
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Freshness lifetime, if sealed responses may be reused
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Current lifecycle state
    pub fn status(&self) -> EntryStatus {
        match &*self.state.borrow() {
            EntryState::Pending => EntryStatus::Pending,
            EntryState::Ready(_) => EntryStatus::Ready,
            EntryState::Failed(_) => EntryStatus::Failed,
        }
    }

    /// Whether a sealed response would be stale at `now`.
    ///
    /// A TTL too large to represent as an instant never expires.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => self
                .created_at
                .checked_add(ttl)
                .map_or(false, |expiry| now >= expiry),
            None => true,
        }
    }

    /// Whether this entry may satisfy a new request at `now`: pending entries
    /// are always joinable, ready ones only while fresh, failed ones never.
    pub fn is_reusable_at(&self, now: Instant) -> bool {
        match self.status() {
            EntryStatus::Pending => true,
            EntryStatus::Ready => !self.is_expired_at(now),
            EntryStatus::Failed => false,
        }
    }

    /// The sealed response, if the entry is ready
    pub fn response(&self) -> Option<Arc<CachedResponse>> {
        match &*self.state.borrow() {
            EntryState::Ready(response) => Some(Arc::clone(response)),
            _ => None,
        }
    }

    /// Wait until the owner seals the entry and return its outcome.
    ///
    /// Dropping the returned future abandons only this caller's wait; the entry
    /// and its other waiters are unaffected.
    pub async fn wait(&self) -> CacheResult<Arc<CachedResponse>> {
        let mut receiver = self.state.subscribe();
        let state = receiver
            .wait_for(|state| !matches!(state, EntryState::Pending))
            .await
            .map_err(|_| CacheError::Abandoned)?;

        match &*state {
            EntryState::Ready(response) => Ok(Arc::clone(response)),
            EntryState::Failed(err) => Err(err.clone()),
            EntryState::Pending => unreachable!("completion signalled for a pending entry"),
        }
    }

    /// Like [`wait`](Self::wait), bounded by `limit`
    pub async fn wait_timeout(&self, limit: Duration) -> CacheResult<Arc<CachedResponse>> {
        match tokio::time::timeout(limit, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                waited_ms: limit.as_millis() as u64,
            }),
        }
    }

    /// Transition `Pending -> Ready`; returns false if already terminal
    fn complete(&self, response: Arc<CachedResponse>) -> bool {
        self.transition(EntryState::Ready(response))
    }

    /// Transition `Pending -> Failed`; returns false if already terminal
    fn fail(&self, err: CacheError) -> bool {
        self.transition(EntryState::Failed(err))
    }

    fn transition(&self, next: EntryState) -> bool {
        self.state.send_if_modified(move |state| {
            if matches!(state, EntryState::Pending) {
                *state = next;
                true
            } else {
                false
            }
        })
    }
}

/// Exclusive handle held by the task that fetches an entry from upstream
///
/// Dropping a writer without sealing it fails the entry with
/// [`CacheError::Abandoned`] and evicts it, so waiters are always released.
#[derive(Debug)]
pub struct EntryWriter {
    entry: Arc<CacheEntry>,
    store: CacheStore,
    status: StatusCode,
    headers: HeaderMap,
    body: BodyBuffer,
    finished: bool,
}

impl EntryWriter {
    pub(crate) fn new(entry: Arc<CacheEntry>, store: CacheStore) -> Self {
        Self {
            entry,
            store,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BodyBuffer::new(),
            finished: false,
        }
    }

    /// The entry being populated
    pub fn entry(&self) -> &Arc<CacheEntry> {
        &self.entry
    }

    /// Record the upstream status line and headers
    pub fn set_head(&mut self, status: StatusCode, headers: HeaderMap) {
        self.status = status;
        self.headers = headers;
    }

    /// Pre-size the body buffer from a declared length
    pub fn reserve_body(&mut self, size_hint: usize) {
        if self.body.is_empty() {
            self.body = BodyBuffer::with_size_hint(size_hint);
        }
    }

    /// Append streamed response bytes
    pub fn write_chunk(&mut self, chunk: &[u8]) {
        self.body.append(chunk);
    }

    /// Bytes buffered so far
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Publish the response, mark the entry ready and wake every waiter
    pub fn seal(mut self) -> Arc<CachedResponse> {
        self.finished = true;

        let body = std::mem::take(&mut self.body).seal();
        let headers = std::mem::take(&mut self.headers);
        let response = Arc::new(CachedResponse::new(self.status, headers, body));

        if !self.entry.complete(Arc::clone(&response)) {
            warn!(key = %self.entry.key(), "Entry was already sealed");
        }

        // Without a TTL nobody after the current waiters may read it
        if self.entry.ttl().is_none() {
            self.store.evict_entry(&self.entry);
        }

        debug!(
            key = %self.entry.key(),
            status = %response.status,
            bytes = response.body.len(),
            "Sealed cache entry"
        );
        response
    }

    /// Evict the entry, mark it failed and wake every waiter with `err`
    pub fn fail(mut self, err: CacheError) {
        self.finished = true;
        self.abort(err);
    }

    fn abort(&self, err: CacheError) {
        self.store.evict_entry(&self.entry);
        self.store.record_failure();
        debug!(key = %self.entry.key(), error = %err, "Cache entry failed");
        self.entry.fail(err);
    }
}

impl Drop for EntryWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.abort(CacheError::Abandoned);
        }
    }
}
