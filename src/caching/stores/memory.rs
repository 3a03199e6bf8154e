//! # In-Memory Cache Store
//!
//! Process-local backend with the same TTL semantics as Redis. Used for local
//! development (`cache.backend: memory`) and as the backend of unit and
//! integration tests.

use super::CacheBackend;
use crate::caching::{CacheError, CacheResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory cache implementation
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: DashMap<String, MemoryEntry>,
    gets: AtomicU64,
    sets: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls that reached this backend
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    /// Number of `set` calls that reached this backend
    pub fn set_count(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    /// Simulate an unreachable backend: every call fails until turned off again
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Raw stored bytes, bypassing expiry bookkeeping
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).map(|e| e.value.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_available(&self) -> CacheResult<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(CacheError::Unavailable {
                message: "in-memory cache marked unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(key);
            debug!(key = %key, "Removed expired in-memory cache entry");
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_vec(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(!self.unavailable.load(Ordering::Relaxed))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_operations() {
        let cache = InMemoryCache::new();
        assert_eq!(cache.get("k").await.unwrap(), None);

        cache.set("k", b"v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(cache.get_count(), 2);
        assert_eq!(cache.set_count(), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let cache = InMemoryCache::new();
        cache.set("k", b"v", Some(Duration::from_millis(50))).await.unwrap();
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_backend_errors() {
        let cache = InMemoryCache::new();
        cache.set_unavailable(true);
        assert!(cache.get("k").await.is_err());
        assert!(cache.set("k", b"v", None).await.is_err());
        assert!(!cache.health_check().await.unwrap());
    }
}
