//! HTTP front end of the proxy

pub mod server;

pub use server::{ProxyServer, ResponseStrategy};
