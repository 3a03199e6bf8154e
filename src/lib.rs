//! # Music API Gateway - Core Library Crate
//!
//! A caching aggregation gateway for music metadata. Clients ask for a song
//! list (single songs, albums, collects, playlists) from one of several music
//! providers; the gateway fetches the provider's API, normalizes the answer to
//! a uniform song list and caches both raw upstream bodies and normalized
//! responses in Redis.
//!
//! ## Request Flow
//! 1. The HTTP front end ([`gateway::server`]) parses `p`, `t`, `i`, `q`, `c`
//! 2. [`gateway::service::MusicService`] checks the response cache
//! 3. On a miss the [`routing::Aggregator`] dispatches through the
//!    [`routing::ProviderRegistry`], splitting multi-id requests
//! 4. Provider adapters ([`providers`]) fetch through the
//!    [`protocols::CachedFetcher`], which consults the URL cache first
//! 5. Results are serialized as `{"status","msg","songs"}`, optionally JSONP

// Core modules - order matters for readability, not for resolution

/// Core functionality: error types, configuration, data types, Redis pool
pub mod core;

/// Cache key codec, compressed cache store and its backends
pub mod caching;

/// Cache-checked upstream HTTP retrieval
pub mod protocols;

/// Provider registry and multi-id aggregation
pub mod routing;

/// Xiami and Netease adapters
pub mod providers;

/// Music service with response cache and the axum front end
pub mod gateway;

/// Structured logging and Prometheus metrics
pub mod observability;

// Re-export commonly used types for easier access

/// Main error type used throughout the gateway
pub use core::error::{GatewayError, GatewayResult};

/// Main configuration structure for the gateway
pub use core::config::GatewayConfig;

/// Normalized data model
pub use core::types::{Provider, Quality, RequestType, Song, SongList};

/// Caching entry points
pub use caching::{CacheKeyCodec, CacheStore};

/// Dispatch entry points
pub use routing::{Aggregator, ProviderRegistry, RegistryBuilder};

/// Server and service entry points
pub use gateway::{AppState, GatewayServer, MusicService};
