//! # Response Caching Module
//!
//! In-memory response cache sitting in front of the forwarding engine. It derives a
//! key per outbound request, coalesces concurrent requests for the same key into a
//! single upstream fetch, and replays the sealed status, headers and body to every
//! caller.
//!
//! ## Architecture
//! 1. **Key deriver**: maps a request onto a [`CacheKey`]
//! 2. **Cache entry**: per-key `Pending -> Ready | Failed` state machine
//! 3. **Cache store**: concurrent key -> entry map with atomic get-or-create
//! 4. **Coordinator**: drives lookups, upstream fetches and replays
//!
//! Freshness is governed only by the operator-supplied TTL; HTTP caching headers
//! are not consulted.

pub mod body;
pub mod coordinator;
pub mod entry;
pub mod key;
pub mod store;

pub use body::BodyBuffer;
pub use coordinator::{CacheCoordinator, CacheOutcome, Served};
pub use entry::{CacheEntry, CachedResponse, EntryStatus, EntryWriter};
pub use key::{CacheKey, DefaultKeyDeriver, KeyDeriver};
pub use store::{Acquired, CacheStats, CacheStore};

use crate::core::error::ProxyError;

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Outcome of a failed fetch, delivered to the owner and to every waiter
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("Upstream fetch failed: {message}")]
    Upstream { message: String },

    #[error("Gave up after waiting {waited_ms}ms for the upstream response")]
    Timeout { waited_ms: u64 },

    #[error("Upstream fetch was abandoned before completing")]
    Abandoned,

    #[error("Request rejected before reaching the upstream: {reason}")]
    InvalidRequest { reason: String },
}

impl CacheError {
    /// Create an upstream error with a custom message
    pub fn upstream<S: Into<String>>(message: S) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }
}

impl From<CacheError> for ProxyError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Upstream { message } => ProxyError::Upstream { message },
            CacheError::Timeout { waited_ms } => ProxyError::Timeout {
                timeout_ms: waited_ms,
            },
            CacheError::Abandoned => {
                ProxyError::upstream("upstream fetch was abandoned before completing")
            }
            CacheError::InvalidRequest { reason } => ProxyError::InvalidRequest { reason },
        }
    }
}

/// Record the owner's failure so waiters observe the same kind of error
impl From<&ProxyError> for CacheError {
    fn from(err: &ProxyError) -> Self {
        match err {
            ProxyError::Upstream { message } => CacheError::upstream(message.clone()),
            ProxyError::Timeout { timeout_ms } => CacheError::Timeout {
                waited_ms: *timeout_ms,
            },
            ProxyError::InvalidRequest { reason } => CacheError::InvalidRequest {
                reason: reason.clone(),
            },
            other => CacheError::upstream(other.to_string()),
        }
    }
}
