//! Request caching for the application's assets and same-origin traffic.
//!
//! This module provides:
//! - Named response caches persisted in SQLite, split into a static and a dynamic
//!   partition per version
//! - Install-time caching of the static asset manifest
//! - Cache-first and network-first strategies with offline fallbacks
//! - Garbage collection of caches left behind by older versions

mod connectivity;
mod engine;
mod http;
mod layer;
mod network;
mod storage;
mod traits;

pub use connectivity::ConnectivityFetcher;
pub use engine::CacheEngine;
pub use http::{Request, ResponseSource};
pub use network::HttpFetcher;
pub use storage::CacheStorage;
