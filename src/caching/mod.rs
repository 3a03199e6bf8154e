//! # Caching System Module
//!
//! Single-level caching over one remote key-value store.
//!
//! ## Architecture
//! 1. **Key codec** ([`key_generator`]): maps semantic ids and raw URLs to short,
//!    collision-free keys in disjoint families
//! 2. **Cache store** ([`cache_manager`]): get/set of opaque blobs with optional
//!    gzip compression and optional expiry
//! 3. **Backends** ([`stores`]): Redis over a pooled connection, or an in-process
//!    map for development and tests
//!
//! ## Usage Example
//! ```rust,ignore
//! let store = CacheStore::new(Arc::new(InMemoryCache::new()));
//! let key = codec.key_for_url("http://music.163.com/api/album/1")?;
//! store.set(&key, b"{...}", Duration::from_secs(3600), true).await?;
//! let cached = store.get(&key, true).await?;
//! ```

pub mod cache_manager;
pub mod key_generator;
pub mod stores;

pub use cache_manager::{CacheStats, CacheStore};
pub use key_generator::CacheKeyCodec;
pub use stores::{CacheBackend, InMemoryCache, RedisCache};

use crate::core::error::GatewayError;

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache key is empty")]
    EmptyKey,

    #[error("Cached value is corrupt: {message}")]
    Corruption { message: String },

    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("Cache operation timeout")]
    Timeout,

    #[error("Cache not available: {message}")]
    Unavailable { message: String },
}

impl From<GatewayError> for CacheError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout { .. } => CacheError::Timeout,
            other => CacheError::Unavailable {
                message: other.to_string(),
            },
        }
    }
}

impl From<CacheError> for GatewayError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Corruption { message } => GatewayError::cache_corruption(message),
            other => GatewayError::Cache {
                message: other.to_string(),
            },
        }
    }
}
