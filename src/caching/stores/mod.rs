//! # Cache Stores Module
//!
//! Backends that hold raw cache blobs. They know nothing about compression or
//! key families; that is the job of [`CacheStore`](crate::caching::CacheStore).

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryCache;
pub use redis_store::RedisCache;

use super::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// Trait for cache backend implementations
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value. `Ok(None)` is a miss, `Err` means the backend failed.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store a value, expiring after `ttl` when given, never otherwise
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()>;

    /// Perform health check
    async fn health_check(&self) -> CacheResult<bool>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}
