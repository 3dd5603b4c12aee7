//! # Cache Metrics
//!
//! Counters emitted through the `metrics` facade. Nothing is recorded unless a
//! recorder has been installed by the embedding application.

use metrics::{counter, describe_counter};

pub const LOOKUPS_TOTAL: &str = "proxy_cache_lookups_total";
pub const EXPIRED_TOTAL: &str = "proxy_cache_expired_total";
pub const FAILURES_TOTAL: &str = "proxy_cache_failures_total";

/// Result of a cache lookup, used as the `outcome` label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    Hit,
    Miss,
    Coalesced,
}

impl LookupOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Coalesced => "coalesced",
        }
    }
}

/// Register descriptions for every cache counter
pub fn describe_metrics() {
    describe_counter!(LOOKUPS_TOTAL, "Cache lookups by outcome");
    describe_counter!(EXPIRED_TOTAL, "Stale cache entries evicted or replaced");
    describe_counter!(FAILURES_TOTAL, "Upstream fetches that ended without a cached response");
}

pub fn record_lookup(outcome: LookupOutcome) {
    counter!(LOOKUPS_TOTAL, "outcome" => outcome.as_str()).increment(1);
}

pub fn record_expired() {
    counter!(EXPIRED_TOTAL).increment(1);
}

pub fn record_failure() {
    counter!(FAILURES_TOTAL).increment(1);
}
