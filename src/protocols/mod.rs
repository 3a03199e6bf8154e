//! # Protocols Module
//!
//! Outbound protocol clients. Upstream providers are reached over plain HTTP,
//! through the cache-checked fetcher in [`http`].

pub mod http;

pub use http::{build_client, CachedFetcher, FetcherSettings};
