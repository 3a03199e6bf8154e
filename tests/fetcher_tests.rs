//! # Cached Fetcher Integration Tests
//!
//! Upstream retrieval against a mock HTTP server:
//! - a cached body is served without a second round trip
//! - error statuses are reported and never cached
//! - concurrent misses on one URL share a single upstream request

use music_api_gateway::caching::{CacheKeyCodec, CacheStore, InMemoryCache};
use music_api_gateway::protocols::{CachedFetcher, FetcherSettings};
use music_api_gateway::GatewayError;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher(backend: Arc<InMemoryCache>) -> CachedFetcher {
    CachedFetcher::new(
        CacheStore::new(backend),
        CacheKeyCodec::default(),
        FetcherSettings {
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        },
    )
    .unwrap()
}

#[tokio::test]
async fn test_second_fetch_is_served_from_cache() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/album/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"code":200}"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = Arc::new(InMemoryCache::new());
    let fetcher = fetcher(backend.clone());
    let url = format!("{}/api/album/1", mock_server.uri());

    let first = fetcher.fetch_url(&url).await.unwrap();
    let second = fetcher.fetch_url(&url).await.unwrap();

    assert_eq!(first, br#"{"code":200}"#.to_vec());
    assert_eq!(first, second);
    assert_eq!(backend.set_count(), 1);

    // Stored compressed under the shortened url key.
    let key = fetcher.codec().key_for_url(&url).unwrap();
    let raw = backend.raw(&key).unwrap();
    assert_eq!(&raw[..2], &[0x1f, 0x8b]);
}

#[tokio::test]
async fn test_error_status_is_not_cached() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/album/2"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&mock_server)
        .await;

    let backend = Arc::new(InMemoryCache::new());
    let fetcher = fetcher(backend.clone());
    let url = format!("{}/api/album/2", mock_server.uri());

    for _ in 0..2 {
        let result = fetcher.fetch_url(&url).await;
        assert!(matches!(result, Err(GatewayError::UpstreamUnavailable { .. })));
    }
    assert_eq!(backend.set_count(), 0);
}

#[tokio::test]
async fn test_concurrent_misses_share_one_request() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/playlist/detail"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("shared")
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = fetcher(Arc::new(InMemoryCache::new()));
    let url = format!("{}/api/playlist/detail?id=9", mock_server.uri());

    let results = futures::future::join_all((0..5).map(|_| fetcher.fetch_url(&url))).await;

    for result in results {
        assert_eq!(result.unwrap(), b"shared".to_vec());
    }
}

#[tokio::test]
async fn test_decorated_request_is_cached_under_plain_url() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/web"))
        .and(header("cookie", "token=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("decorated"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = Arc::new(InMemoryCache::new());
    let fetcher = fetcher(backend.clone());
    let plain = format!("{}/web?r=song/detail&id=1", mock_server.uri());
    let decorated = format!("{}&token=abc", plain);

    let request = fetcher.client().get(&decorated).header("cookie", "token=abc");
    assert_eq!(fetcher.fetch_request(&plain, request).await.unwrap(), b"decorated".to_vec());

    // The plain url now hits the cache, no request is sent.
    assert_eq!(fetcher.fetch_url(&plain).await.unwrap(), b"decorated".to_vec());
    let key = fetcher.codec().key_for_url(&plain).unwrap();
    assert!(!key.contains("token"));
}

#[tokio::test]
async fn test_timeout_is_upstream_unavailable() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&mock_server)
        .await;

    let backend = Arc::new(InMemoryCache::new());
    let fetcher = CachedFetcher::new(
        CacheStore::new(backend.clone()),
        CacheKeyCodec::default(),
        FetcherSettings {
            request_timeout: Duration::from_millis(100),
            ..Default::default()
        },
    )
    .unwrap();

    let result = fetcher.fetch_url(&format!("{}/slow", mock_server.uri())).await;
    assert!(matches!(result, Err(GatewayError::UpstreamUnavailable { .. })));
    assert_eq!(backend.set_count(), 0);
}
