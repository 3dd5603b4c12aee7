//! # Cache Key Derivation
//!
//! Maps an outbound request onto the key its cached response is stored under.
//!
//! The default derivation concatenates method, scheme, host, path and query
//! with no normalization. Requests that differ only in host or path case get
//! distinct keys, and requests that differ only in headers share one key: the
//! cache does not look at `Vary` or any other header.

use crate::core::types::OutboundRequest;
use std::fmt;

/// Opaque, immutable identifier of a cacheable request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Create a key from an already-derived string
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self(key.into())
    }

    /// Get the key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache key derivation trait
///
/// Implementations must be pure: the same request always yields the same key.
pub trait KeyDeriver: Send + Sync {
    /// Derive the cache key for a prepared outbound request
    fn derive(&self, request: &OutboundRequest) -> CacheKey;
}

/// Default key deriver: `method + scheme + host + path + ("?" + query)`
#[derive(Debug, Clone, Default)]
pub struct DefaultKeyDeriver {
    fold_case: bool,
}

impl DefaultKeyDeriver {
    /// Create a deriver that performs no normalization
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowercase scheme and host before building the key
    pub fn with_case_folding(mut self, fold_case: bool) -> Self {
        self.fold_case = fold_case;
        self
    }
}

impl KeyDeriver for DefaultKeyDeriver {
    fn derive(&self, request: &OutboundRequest) -> CacheKey {
        let uri = &request.uri;

        let mut scheme = uri.scheme_str().unwrap_or_default().to_string();
        let mut host = match (uri.host(), uri.port_u16()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };

        if self.fold_case {
            scheme.make_ascii_lowercase();
            host.make_ascii_lowercase();
        }

        let mut key = String::with_capacity(
            request.method.as_str().len() + scheme.len() + host.len() + uri.path().len() + 16,
        );
        key.push_str(request.method.as_str());
        key.push_str(&scheme);
        key.push_str(&host);
        key.push_str(uri.path());

        if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
            key.push('?');
            key.push_str(query);
        }

        CacheKey(key)
    }
}
