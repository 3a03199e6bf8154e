//! # Cache Store
//!
//! Get/set of opaque byte blobs with optional gzip compression and optional
//! expiry, over any [`CacheBackend`].
//!
//! Compression is not self-describing: whoever writes a key with
//! `compress = true` must read it with `decompress = true`. A blob that does not
//! decode is reported as [`CacheError::Corruption`], never returned.

use super::{CacheBackend, CacheError, CacheResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub sets: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    sets: AtomicU64,
}

/// Stateless façade over a shared cache backend
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    counters: Arc<Counters>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Fetch the blob stored under `key`.
    ///
    /// An empty key is a miss and never reaches the backend.
    pub async fn get(&self, key: &str, decompress: bool) -> CacheResult<Option<Vec<u8>>> {
        if key.is_empty() {
            return Ok(None);
        }

        let stored = match self.backend.get(key).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                counter!("cache_misses_total").increment(1);
                debug!(key = %key, "Cache miss");
                return Ok(None);
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                counter!("cache_errors_total").increment(1);
                warn!(key = %key, backend = self.backend.name(), error = %e, "Cache get failed");
                return Err(e);
            }
        };

        let value = if decompress {
            gunzip(&stored).map_err(|e| {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                counter!("cache_corruptions_total").increment(1);
                warn!(key = %key, error = %e, "Failed to decompress cached value");
                e
            })?
        } else {
            stored
        };

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        counter!("cache_hits_total").increment(1);
        debug!(key = %key, size = value.len(), "Cache hit");
        Ok(Some(value))
    }

    /// Store `value` under `key`, expiring after `ttl` (zero means never).
    ///
    /// An empty key fails without reaching the backend.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration, compress: bool) -> CacheResult<()> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }

        let compressed;
        let payload = if compress {
            compressed = gzip(value)?;
            compressed.as_slice()
        } else {
            value
        };

        let ttl = (!ttl.is_zero()).then_some(ttl);
        self.backend.set(key, payload, ttl).await.map_err(|e| {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            counter!("cache_errors_total").increment(1);
            warn!(key = %key, backend = self.backend.name(), error = %e, "Cache set failed");
            e
        })?;

        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, size = payload.len(), ttl = ?ttl, compressed = compress, "Cache set");
        Ok(())
    }

    /// Backend health check
    pub async fn health_check(&self) -> bool {
        self.backend.health_check().await.unwrap_or(false)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
        }
    }
}

fn gzip(data: &[u8]) -> CacheResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn gunzip(data: &[u8]) -> CacheResult<Vec<u8>> {
    if !data.starts_with(&GZIP_MAGIC) {
        return Err(CacheError::Corruption {
            message: "missing gzip header".to_string(),
        });
    }

    let mut decoded = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|e| CacheError::Corruption {
            message: e.to_string(),
        })?;
    Ok(decoded)
}
