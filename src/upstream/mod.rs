//! # Forwarding Engine
//!
//! The component that actually talks to the origin. The response cache calls into
//! it through the [`ForwardingEngine`] trait and wraps whatever it returns, so a
//! test double or a different transport can be slotted in without touching the
//! cache.

pub mod http;

pub use self::http::HttpForwarder;

use crate::core::error::ProxyResult;
use crate::core::types::{OutboundRequest, UpstreamResponse};
use async_trait::async_trait;

/// Performs upstream calls on behalf of the proxy
#[async_trait]
pub trait ForwardingEngine: Send + Sync {
    /// Engine-specific normalization applied before the request is keyed or sent
    fn prepare(&self, _request: &mut OutboundRequest) {}

    /// Send the request upstream. The body stream is read to completion by the
    /// caller; an `Err` means no usable response was obtained.
    async fn forward(&self, request: OutboundRequest) -> ProxyResult<UpstreamResponse>;
}
