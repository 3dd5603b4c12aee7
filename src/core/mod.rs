//! Core building blocks shared by every part of the proxy.

pub mod config;
pub mod error;
pub mod types;

pub use config::ProxyConfig;
pub use error::{ProxyError, ProxyResult};
pub use types::{BodyStream, OutboundRequest, UpstreamResponse};
