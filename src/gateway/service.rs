//! # Music Service
//!
//! Request handling behind the HTTP front end: validates the request against
//! the registry, serves normalized responses from the response cache and
//! otherwise resolves them through the aggregator.
//!
//! Only successful results are cached. Requests for a non-default quality
//! bypass the response cache since the semantic key does not encode quality.

use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::caching::{CacheKeyCodec, CacheStore};
use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Quality, SongList};
use crate::protocols::{CachedFetcher, FetcherSettings};
use crate::providers;
use crate::routing::{Aggregator, ProviderRegistry};

/// Parsed client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MusicRequest {
    pub provider: String,
    pub request_type: String,
    pub id: String,
    pub quality: Quality,
}

impl MusicRequest {
    pub fn new(provider: impl Into<String>, request_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            request_type: request_type.into(),
            id: id.into(),
            quality: Quality::default(),
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }
}

/// Response cache settings
#[derive(Debug, Clone)]
pub struct ResponseCacheSettings {
    pub enabled: bool,
    /// Zero means no expiry
    pub ttl: Duration,
    pub compress: bool,
}

impl ResponseCacheSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            enabled: config.cache.response_cache_enabled,
            ttl: config.cache.default_ttl,
            compress: config.cache.compress_responses,
        }
    }
}

impl Default for ResponseCacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(3600),
            compress: true,
        }
    }
}

#[derive(Clone)]
pub struct MusicService {
    aggregator: Aggregator,
    store: CacheStore,
    codec: CacheKeyCodec,
    settings: ResponseCacheSettings,
}

impl MusicService {
    pub fn new(aggregator: Aggregator, store: CacheStore, codec: CacheKeyCodec, settings: ResponseCacheSettings) -> Self {
        Self {
            aggregator,
            store,
            codec,
            settings,
        }
    }

    /// Wire the built-in providers over `store` as described by `config`
    pub fn from_config(config: &GatewayConfig, store: CacheStore) -> GatewayResult<Self> {
        let codec = CacheKeyCodec::new(config.cache.key_prefix.clone());
        let fetcher = CachedFetcher::new(store.clone(), codec.clone(), FetcherSettings::from_config(config))?;

        let registry = providers::register_all(ProviderRegistry::builder(), &fetcher, &config.upstream).build()?;
        let aggregator = Aggregator::new(Arc::new(registry));

        Ok(Self::new(
            aggregator,
            store,
            codec,
            ResponseCacheSettings::from_config(config),
        ))
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Handle one request. Every outcome, including invalid input, is a `SongList`.
    #[instrument(skip(self), fields(provider = %request.provider, request_type = %request.request_type))]
    pub async fn handle(&self, request: &MusicRequest) -> SongList {
        counter!("gateway_requests_total").increment(1);
        let id = request.id.trim();

        let result = if !self.aggregator.supports(&request.provider, &request.request_type) {
            // Rejected before any cache or network access.
            self.aggregator
                .resolve(&request.provider, &request.request_type, id, request.quality)
                .await
        } else if id.is_empty() {
            SongList::from_error(&GatewayError::invalid_argument("id", "id is empty"))
        } else {
            match self.cache_key(request, id) {
                Some(key) => self.cached_resolve(&key, request, id).await,
                None => {
                    self.aggregator
                        .resolve(&request.provider, &request.request_type, id, request.quality)
                        .await
                }
            }
        };

        if result.is_failed() {
            counter!("gateway_failed_responses_total").increment(1);
        }
        result
    }

    fn cache_key(&self, request: &MusicRequest, id: &str) -> Option<String> {
        if !self.settings.enabled || !request.quality.is_default() {
            return None;
        }
        match self
            .codec
            .key_for_semantic_id(&request.provider, &request.request_type, id)
        {
            Ok(key) => Some(key),
            Err(e) => {
                debug!(error = %e, "No response cache key for request");
                None
            }
        }
    }

    async fn cached_resolve(&self, key: &str, request: &MusicRequest, id: &str) -> SongList {
        if let Some(cached) = self.cached(key).await {
            counter!("response_cache_hits_total").increment(1);
            return cached;
        }
        counter!("response_cache_misses_total").increment(1);

        let result = self
            .aggregator
            .resolve(&request.provider, &request.request_type, id, request.quality)
            .await;

        if !result.is_failed() {
            self.store_result(key, &result).await;
        }
        result
    }

    /// Cached successful result. Unreadable entries are misses.
    async fn cached(&self, key: &str) -> Option<SongList> {
        let bytes = match self.store.get(key, self.settings.compress).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                let e = GatewayError::from(e);
                if e.is_cache_miss_equivalent() {
                    debug!(key = %key, error = %e, "Response cache read failed, treating as miss");
                } else {
                    warn!(key = %key, error = %e, "Response cache unavailable, treating as miss");
                }
                return None;
            }
        };

        match SongList::from_json_bytes(&bytes) {
            Ok(list) if !list.is_failed() => {
                debug!(key = %key, songs = list.len(), "Serving response from cache");
                Some(list)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring unparseable cached response");
                None
            }
        }
    }

    async fn store_result(&self, key: &str, result: &SongList) {
        let bytes = match result.to_json_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize response");
                return;
            }
        };
        if let Err(e) = self
            .store
            .set(key, &bytes, self.settings.ttl, self.settings.compress)
            .await
        {
            warn!(key = %key, error = %e, "Failed to cache response");
        }
    }
}
