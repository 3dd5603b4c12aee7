//! # Caching Proxy - Core Library Crate
//!
//! A reverse proxy that forwards every request to a single upstream and can
//! answer repeated requests from an in-memory response cache. Concurrent
//! requests for the same resource are coalesced into one upstream fetch whose
//! result is shared by every caller.

/// Error types, configuration, and the request/response shapes shared by all modules
pub mod core;

/// In-memory response cache: key derivation, entries, store, and coordinator
pub mod caching;

/// The forwarding engine that talks to the upstream
pub mod upstream;

/// Axum server and response strategies
pub mod gateway;

/// Logging setup and cache counters
pub mod observability;

pub use caching::{CacheCoordinator, CacheKey, CacheStore, DefaultKeyDeriver, KeyDeriver};
pub use core::config::ProxyConfig;
pub use core::error::{ProxyError, ProxyResult};
pub use core::types::{OutboundRequest, UpstreamResponse};
pub use gateway::server::{ProxyServer, ResponseStrategy};
pub use upstream::{ForwardingEngine, HttpForwarder};
