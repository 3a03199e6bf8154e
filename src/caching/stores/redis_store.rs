//! # Redis Cache Store
//!
//! Redis-backed cache blobs. Every call checks out one pooled connection and
//! releases it when the call returns. Failures are reported, never retried here.

use super::CacheBackend;
use crate::caching::{CacheError, CacheResult};
use crate::core::connection_pool::RedisConnectionPool;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Redis cache implementation
pub struct RedisCache {
    pool: Arc<RedisConnectionPool>,
}

impl RedisCache {
    /// Create a Redis cache on top of an existing connection pool
    pub fn new(pool: Arc<RedisConnectionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<RedisConnectionPool> {
        &self.pool
    }
}

/// Build the SET command. Expiry uses PX so sub-second TTLs are honoured.
fn set_command(key: &str, value: &[u8], ttl: Option<Duration>) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    if let Some(ttl) = ttl {
        let millis = ttl.as_millis().clamp(1, u64::MAX as u128) as u64;
        cmd.arg("PX").arg(millis);
    }
    cmd
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.pool.get().await?;

        let mut cmd = redis::cmd("GET");
        cmd.arg(key);

        let value: Option<Vec<u8>> = conn.query(&cmd).await.map_err(|e| {
            error!(key = %key, error = %e, "Failed to get from redis server");
            CacheError::from(e)
        })?;

        debug!(key = %key, hit = value.is_some(), "Redis GET");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;

        let _: () = conn.query(&set_command(key, value, ttl)).await.map_err(|e| {
            error!(key = %key, error = %e, "Failed to send value to redis server");
            CacheError::from(e)
        })?;

        debug!(key = %key, ttl = ?ttl, size = value.len(), "Redis SET");
        Ok(())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(self.pool.health_check().await)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
