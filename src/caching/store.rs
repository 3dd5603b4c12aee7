//! # In-Memory Cache Store
//!
//! Concurrent registry of key -> [`CacheEntry`]. The map is a sharded `DashMap`,
//! so creating or removing an entry only locks the shard holding its key and a
//! long upstream fetch never blocks unrelated keys. Entry state is synchronized by
//! the entry itself, not by the map.
//!
//! Expiry is lazy: a stale or failed entry is evicted by the lookup that finds
//! it. There is no background sweep.

use super::entry::{CacheEntry, EntryStatus, EntryWriter};
use super::key::CacheKey;
use crate::observability::metrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Cache store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries currently stored
    pub entries: usize,

    /// Lookups answered by a fresh ready entry
    pub hits: u64,

    /// Lookups that created a new entry and fetched upstream
    pub misses: u64,

    /// Lookups that joined an in-flight fetch
    pub coalesced: u64,

    /// Stale entries evicted or replaced
    pub expired: u64,

    /// Fetches that ended without a sealed response
    pub failures: u64,
}

/// Result of [`CacheStore::get_or_create`]
#[derive(Debug)]
pub enum Acquired {
    /// The key was absent or stale: the caller now owns the fetch
    Created(EntryWriter),

    /// A reusable entry already exists: the caller waits on or replays it
    Existing(Arc<CacheEntry>),
}

impl Acquired {
    /// Whether this call created the entry
    pub fn created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    /// The acquired entry
    pub fn entry(&self) -> &Arc<CacheEntry> {
        match self {
            Self::Created(writer) => writer.entry(),
            Self::Existing(entry) => entry,
        }
    }

    /// The owner's writer, if this call created the entry
    pub fn into_writer(self) -> Option<EntryWriter> {
        match self {
            Self::Created(writer) => Some(writer),
            Self::Existing(_) => None,
        }
    }
}

#[derive(Default)]
struct StoreInner {
    entries: DashMap<CacheKey, Arc<CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    expired: AtomicU64,
    failures: AtomicU64,
}

/// Shared handle to the in-memory cache; clones refer to the same entries
#[derive(Clone, Default)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

impl CacheStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking lookup.
    ///
    /// A pending entry is returned so the caller can join it; a stale or failed
    /// entry is evicted and reported as absent.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let now = Instant::now();
        let found = self.inner.entries.get(key).map(|e| Arc::clone(e.value()))?;

        if found.is_reusable_at(now) {
            Some(found)
        } else {
            if self.evict_entry(&found) && found.status() == EntryStatus::Ready {
                self.record_expired();
            }
            None
        }
    }

    /// Atomic check-and-insert.
    ///
    /// If `key` is absent, or its entry is stale or failed, a fresh pending entry
    /// replaces it and the caller receives the only [`EntryWriter`] for it.
    /// Concurrent callers for the same key serialize on the key's shard, so at
    /// most one of them gets [`Acquired::Created`].
    pub fn get_or_create(&self, key: CacheKey, ttl: Option<Duration>) -> Acquired {
        let now = Instant::now();

        // The shard guard must be released before a writer exists: a writer
        // dropped under the guard would deadlock evicting from the same shard.
        let (entry, created) = match self.inner.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_reusable_at(now) {
                    (Arc::clone(occupied.get()), false)
                } else {
                    if occupied.get().status() == EntryStatus::Ready {
                        self.record_expired();
                    }
                    let fresh = Arc::new(CacheEntry::new(occupied.key().clone(), ttl));
                    occupied.insert(Arc::clone(&fresh));
                    (fresh, true)
                }
            }
            Entry::Vacant(vacant) => {
                let fresh = Arc::new(CacheEntry::new(vacant.key().clone(), ttl));
                vacant.insert(Arc::clone(&fresh));
                (fresh, true)
            }
        };

        if created {
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
            metrics::record_lookup(metrics::LookupOutcome::Miss);
            debug!(key = %entry.key(), "Created cache entry");
            Acquired::Created(EntryWriter::new(entry, self.clone()))
        } else {
            if entry.status() == EntryStatus::Pending {
                self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                metrics::record_lookup(metrics::LookupOutcome::Coalesced);
            } else {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_lookup(metrics::LookupOutcome::Hit);
            }
            Acquired::Existing(entry)
        }
    }

    /// Evict whatever entry is stored under `key`
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.inner.entries.remove(key).is_some()
    }

    /// Evict `entry` only if it is still the one stored under its key, so a
    /// replacement created in the meantime survives
    pub(crate) fn evict_entry(&self, entry: &Arc<CacheEntry>) -> bool {
        self.inner
            .entries
            .remove_if(entry.key(), |_, current| Arc::ptr_eq(current, entry))
            .is_some()
    }

    pub(crate) fn record_failure(&self) {
        self.inner.failures.fetch_add(1, Ordering::Relaxed);
        metrics::record_failure();
    }

    fn record_expired(&self) {
        self.inner.expired.fetch_add(1, Ordering::Relaxed);
        metrics::record_expired();
    }

    /// Number of stored entries, pending ones included
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Drop every entry. In-flight fetches still complete for their waiters.
    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    /// Snapshot of the store counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.inner.entries.len(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            expired: self.inner.expired.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.inner.entries.len())
            .finish()
    }
}
