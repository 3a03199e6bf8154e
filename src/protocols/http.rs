//! # Cache-Checked HTTP Retrieval
//!
//! Upstream GETs that consult the URL cache family first.
//!
//! ## Behaviour
//! - Cache hit: bytes are returned without network access
//! - Miss: one GET bounded by the upstream timeout; the body is cached
//!   (compressed, default TTL) only when the request succeeded
//! - Concurrent misses on the same URL wait for the first one instead of
//!   issuing their own request

use dashmap::DashMap;
use metrics::counter;
use reqwest::{Client, RequestBuilder};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::caching::{CacheKeyCodec, CacheStore};
use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};

/// Settings of the cached fetcher
#[derive(Debug, Clone)]
pub struct FetcherSettings {
    /// Overall timeout of one upstream request
    pub request_timeout: Duration,
    /// Expiry of cached bodies, zero means never
    pub ttl: Duration,
    /// Gzip cached bodies
    pub compress: bool,
}

impl FetcherSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            request_timeout: config.upstream.request_timeout,
            ttl: config.cache.default_ttl,
            compress: config.cache.compress_urls,
        }
    }
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            ttl: Duration::from_secs(3600),
            compress: true,
        }
    }
}

/// Build an HTTP client with the upstream timeout applied
pub fn build_client(request_timeout: Duration) -> GatewayResult<Client> {
    Client::builder()
        .timeout(request_timeout)
        .build()
        .map_err(|e| GatewayError::config(format!("Failed to build HTTP client: {}", e)))
}

type InFlightMap = DashMap<String, Arc<Mutex<()>>>;

/// Membership of one caller in the in-flight gate of a key.
///
/// Dropping it removes the gate once no other caller holds it, also when the
/// caller's future is abandoned mid-fetch.
struct InFlight<'a> {
    map: &'a InFlightMap,
    key: &'a str,
    gate: Arc<Mutex<()>>,
}

impl<'a> InFlight<'a> {
    fn enter(map: &'a InFlightMap, key: &'a str) -> Self {
        let gate = map
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Self { map, key, gate }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        // The map and this handle are the only owners left.
        self.map.remove_if(self.key, |_, gate| Arc::strong_count(gate) == 2);
    }
}

/// HTTP GETs backed by the URL cache family
#[derive(Clone)]
pub struct CachedFetcher {
    client: Client,
    store: CacheStore,
    codec: CacheKeyCodec,
    settings: FetcherSettings,
    in_flight: Arc<InFlightMap>,
}

impl CachedFetcher {
    pub fn new(store: CacheStore, codec: CacheKeyCodec, settings: FetcherSettings) -> GatewayResult<Self> {
        Ok(Self {
            client: build_client(settings.request_timeout)?,
            store,
            codec,
            settings,
            in_flight: Arc::new(DashMap::new()),
        })
    }

    /// Default client, for adapters that need no request decoration
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn codec(&self) -> &CacheKeyCodec {
        &self.codec
    }

    /// GET `url`, served from cache when possible
    pub async fn fetch_url(&self, url: &str) -> GatewayResult<Vec<u8>> {
        self.fetch_request(url, self.client.get(url)).await
    }

    /// Send `request`, caching the body under `cache_url`.
    ///
    /// `cache_url` is the undecorated URL: tokens or headers added to `request`
    /// do not change the cache key.
    pub async fn fetch_request(&self, cache_url: &str, request: RequestBuilder) -> GatewayResult<Vec<u8>> {
        self.fetch_with(cache_url, move || async move { Ok(request) }).await
    }

    /// Like [`fetch_request`](Self::fetch_request), but the request is only
    /// built on a cache miss.
    #[instrument(skip_all, fields(url = %cache_url))]
    pub async fn fetch_with<F, Fut>(&self, cache_url: &str, build: F) -> GatewayResult<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<RequestBuilder>>,
    {
        let key = self.codec.key_for_url(cache_url)?;

        if let Some(body) = self.cached(&key).await {
            return Ok(body);
        }

        let in_flight = InFlight::enter(&self.in_flight, &key);
        let _lock = in_flight.gate.lock().await;

        // Another caller may have filled the cache while we waited.
        if let Some(body) = self.cached(&key).await {
            return Ok(body);
        }
        let request = build().await?;
        self.fetch_and_store(&key, cache_url, request).await
    }

    async fn cached(&self, key: &str) -> Option<Vec<u8>> {
        match self.store.get(key, self.settings.compress).await {
            Ok(Some(body)) => {
                debug!(key = %key, "Serving upstream body from cache");
                Some(body)
            }
            Ok(None) => None,
            Err(e) => {
                debug!(key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn fetch_and_store(&self, key: &str, url: &str, request: RequestBuilder) -> GatewayResult<Vec<u8>> {
        counter!("upstream_requests_total").increment(1);

        let response = request
            .timeout(self.settings.request_timeout)
            .send()
            .await
            .map_err(|e| {
                counter!("upstream_failures_total").increment(1);
                warn!(url = %url, error = %e, "Error getting url");
                GatewayError::upstream_unavailable(url, e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            counter!("upstream_failures_total").increment(1);
            warn!(url = %url, status = %status, "Upstream answered with an error status");
            return Err(GatewayError::upstream_unavailable(url, format!("HTTP status {}", status)));
        }

        let body = response.bytes().await.map_err(|e| {
            counter!("upstream_failures_total").increment(1);
            warn!(url = %url, error = %e, "Error reading response body");
            GatewayError::upstream_unavailable(url, e.to_string())
        })?;
        let body = body.to_vec();

        if let Err(e) = self
            .store
            .set(key, &body, self.settings.ttl, self.settings.compress)
            .await
        {
            warn!(key = %key, error = %e, "Failed to cache upstream body");
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::{CacheBackend, InMemoryCache};

    fn fetcher_with(backend: Arc<InMemoryCache>) -> CachedFetcher {
        CachedFetcher::new(
            CacheStore::new(backend),
            CacheKeyCodec::default(),
            FetcherSettings {
                request_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let backend = Arc::new(InMemoryCache::new());
        let fetcher = fetcher_with(backend.clone());

        // Port 1 refuses connections, so only a cache hit can succeed.
        let url = "http://127.0.0.1:1/album/1";
        let key = fetcher.codec().key_for_url(url).unwrap();
        fetcher
            .store()
            .set(&key, b"cached body", Duration::ZERO, true)
            .await
            .unwrap();

        assert_eq!(fetcher.fetch_url(url).await.unwrap(), b"cached body".to_vec());
    }

    #[tokio::test]
    async fn test_network_failure_is_not_cached() {
        let backend = Arc::new(InMemoryCache::new());
        let fetcher = fetcher_with(backend.clone());

        let result = fetcher.fetch_url("http://127.0.0.1:1/album/1").await;
        assert!(matches!(result, Err(GatewayError::UpstreamUnavailable { .. })));
        assert_eq!(backend.set_count(), 0);
        assert!(fetcher.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_falls_through() {
        let backend = Arc::new(InMemoryCache::new());
        let fetcher = fetcher_with(backend.clone());

        let url = "http://127.0.0.1:1/album/2";
        let key = fetcher.codec().key_for_url(url).unwrap();
        backend.set(&key, b"not gzip", None).await.unwrap();

        // Corrupt entry is a miss, so the (failing) network path runs.
        assert!(fetcher.fetch_url(url).await.is_err());
    }

    #[tokio::test]
    async fn test_request_not_built_on_hit() {
        let backend = Arc::new(InMemoryCache::new());
        let fetcher = fetcher_with(backend);

        let url = "http://127.0.0.1:1/song/3";
        let key = fetcher.codec().key_for_url(url).unwrap();
        fetcher.store().set(&key, b"hit", Duration::ZERO, true).await.unwrap();

        let body = fetcher
            .fetch_with(url, || async { Err(GatewayError::config("must not be built")) })
            .await
            .unwrap();
        assert_eq!(body, b"hit".to_vec());

        let miss = fetcher
            .fetch_with("http://127.0.0.1:1/song/4", || async {
                Err(GatewayError::upstream_unavailable("token", "refused"))
            })
            .await;
        assert!(matches!(miss, Err(GatewayError::UpstreamUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_abandoned_fetches_leave_no_gates() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let fetcher = fetcher_with(Arc::new(InMemoryCache::new()));
        for i in 0..20 {
            let url = format!("http://{}/album/{}", addr, i);
            let abandoned = tokio::time::timeout(Duration::from_millis(20), fetcher.fetch_url(&url)).await;
            assert!(abandoned.is_err());
        }

        assert_eq!(fetcher.in_flight.len(), 0);
        accept.abort();
    }

    #[test]
    fn test_gate_survives_while_another_caller_waits() {
        let fetcher = fetcher_with(Arc::new(InMemoryCache::new()));
        let first = InFlight::enter(&fetcher.in_flight, "k");
        let second = InFlight::enter(&fetcher.in_flight, "k");
        assert!(Arc::ptr_eq(&first.gate, &second.gate));

        drop(first);
        assert_eq!(fetcher.in_flight.len(), 1);
        drop(second);
        assert!(fetcher.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_empty_url_is_invalid() {
        let fetcher = fetcher_with(Arc::new(InMemoryCache::new()));
        assert!(matches!(
            fetcher.fetch_url("").await,
            Err(GatewayError::InvalidArgument { .. })
        ));
    }
}
