//! # Provider Adapter Integration Tests
//!
//! Xiami and Netease adapters against mock upstream APIs, dispatched through
//! the real registry and aggregator.

use music_api_gateway::caching::{CacheKeyCodec, CacheStore, InMemoryCache};
use music_api_gateway::core::config::UpstreamConfig;
use music_api_gateway::protocols::{CachedFetcher, FetcherSettings};
use music_api_gateway::providers;
use music_api_gateway::{Aggregator, ProviderRegistry, Quality, SongList};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    aggregator: Aggregator,
    backend: Arc<InMemoryCache>,
}

fn harness(mock_server: &MockServer) -> Harness {
    let backend = Arc::new(InMemoryCache::new());
    let fetcher = CachedFetcher::new(
        CacheStore::new(backend.clone()),
        CacheKeyCodec::default(),
        FetcherSettings {
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        },
    )
    .unwrap();

    let upstream = UpstreamConfig {
        xiami_api_base: format!("{}/web?v=2.0&app_key=1&r=", mock_server.uri()),
        xiami_token_url: mock_server.uri(),
        netease_api_base: format!("{}/api", mock_server.uri()),
        ..Default::default()
    };

    let registry = providers::register_all(ProviderRegistry::builder(), &fetcher, &upstream)
        .build()
        .unwrap();
    Harness {
        aggregator: Aggregator::new(Arc::new(registry)),
        backend,
    }
}

async fn mount_xiami_token(mock_server: &MockServer) {
    Mock::given(method("HEAD"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("set-cookie", "_xiamitoken=tok42; Path=/; Domain=.xiami.com"),
        )
        .expect(1)
        .mount(mock_server)
        .await;
}

fn xiami_song(id: &str) -> serde_json::Value {
    json!({
        "state": 0,
        "message": "",
        "data": {"song": {
            "song_name": format!("song {}", id),
            "listen_file": format!("http://cdn.xiami/{}.mp3", id),
            "singers": "singer"
        }}
    })
}

#[tokio::test]
async fn test_xiami_songlist_uses_token_and_keeps_order() {
    let mock_server = MockServer::start().await;
    mount_xiami_token(&mock_server).await;

    for id in ["11", "12"] {
        Mock::given(method("GET"))
            .and(path("/web"))
            .and(query_param("r", "song/detail"))
            .and(query_param("id", id))
            .and(query_param("_xiamitoken", "tok42"))
            .and(header("cookie", "_xiamitoken=tok42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(xiami_song(id)))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let h = harness(&mock_server);
    let result = h.aggregator.resolve("xiami", "songlist", "12, 11", Quality::Medium).await;

    let names: Vec<_> = result.songs().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["song 12", "song 11"]);
    assert_eq!(result.songs()[0].provider, "http://www.xiami.com/");
    assert_eq!(result.songs()[0].url, "http://cdn.xiami/12.mp3");

    // Second resolution is served from the url cache: no token, no GETs.
    let again = h.aggregator.resolve("xiami", "songlist", "12,11", Quality::Medium).await;
    assert_eq!(again, result);
    assert_eq!(h.backend.set_count(), 2);
}

#[tokio::test]
async fn test_xiami_failure_short_circuits_songlist() {
    let mock_server = MockServer::start().await;
    mount_xiami_token(&mock_server).await;

    Mock::given(method("GET"))
        .and(query_param("id", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(xiami_song("1")))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("id", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": 1, "message": "not found"})))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("id", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(xiami_song("3")))
        .expect(0)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let result = h.aggregator.resolve("xiami", "songlist", "1,2,3", Quality::Medium).await;

    assert!(result.is_failed());
    assert!(result.message().contains("not found"));
    assert!(result.songs().is_empty());
}

#[tokio::test]
async fn test_xiami_album_without_songs_is_invalid_url() {
    let mock_server = MockServer::start().await;
    mount_xiami_token(&mock_server).await;
    Mock::given(method("GET"))
        .and(query_param("r", "album/detail"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": 0, "data": {}})))
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let result = h.aggregator.resolve("xiami", "album", "5", Quality::Medium).await;

    assert!(result.is_failed());
    assert!(result.message().contains("invalid xiami url"));
}

#[tokio::test]
async fn test_xiami_missing_token_fails_request() {
    let mock_server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(xiami_song("1")))
        .expect(0)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let result = h.aggregator.resolve("xiami", "collect", "7", Quality::Medium).await;

    assert!(result.is_failed());
    assert!(result.message().contains("xiami token"));
}

fn netease_album() -> serde_json::Value {
    json!({
        "code": 200,
        "album": {"songs": [{
            "name": "track",
            "mp3Url": "http://m2.music.126.net/medium.mp3",
            "artists": [{"name": "a"}, {"name": "b"}],
            "hMusic": {"bitrate": 320000, "dfsId": 5639395138885805u64},
            "mMusic": {"bitrate": 160000, "dfsId": 2},
            "lMusic": {"bitrate": 96000, "dfsId": 7936274930427180u64}
        }]}
    })
}

#[tokio::test]
async fn test_netease_album_quality_rewrites_url() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/album/3"))
        .and(header("cookie", "appver=1.4.1.62460; os=pc; osver=Microsoft-Windows-7-Ultimate-Edition-build-7600-64bit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(netease_album()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);

    let medium = h.aggregator.resolve("netease", "album", "3", Quality::Medium).await;
    assert_eq!(medium.songs()[0].url, "http://m2.music.126.net/medium.mp3");
    assert_eq!(medium.songs()[0].artists, "a,b");
    assert_eq!(medium.songs()[0].provider, "http://music.163.com/");

    let high = h.aggregator.resolve("netease", "album", "3", Quality::High).await;
    assert_eq!(
        high.songs()[0].url,
        "http://m1.music.126.net/6y-UleORITEDbvrOLV0Q8A==/5639395138885805.mp3"
    );

    let low = h.aggregator.resolve("netease", "album", "3", Quality::Low).await;
    assert_eq!(
        low.songs()[0].url,
        "http://m1.music.126.net/G_e-rRmf047AD9xcWT9tlw==/7936274930427180.mp3"
    );

    assert_eq!(
        h.backend.raw("mas:163eid:5639395138885805"),
        Some(b"6y-UleORITEDbvrOLV0Q8A==".to_vec())
    );
}

#[tokio::test]
async fn test_netease_songlist_is_one_request() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/song/detail"))
        .and(query_param("ids", "[1,2]"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "songs": [
                {"name": "one", "mp3Url": "u1", "artists": [{"name": "x"}]},
                {"name": "two", "mp3Url": "u2", "artists": []}
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let result = h.aggregator.resolve("netease", "songlist", "1,2", Quality::Medium).await;

    let names: Vec<_> = result.songs().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["one", "two"]);
    assert_eq!(result.songs()[1].artists, "");
}

#[tokio::test]
async fn test_netease_error_code_is_failed() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/playlist/detail"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 404, "message": "playlist gone"})))
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let result = h.aggregator.resolve("netease", "playlist", "8", Quality::Medium).await;

    assert!(result.is_failed());
    assert!(result.message().contains("playlist gone"));
}

#[tokio::test]
async fn test_netease_has_no_collect_handler() {
    let mock_server = MockServer::start().await;
    let h = harness(&mock_server);

    let result = h.aggregator.resolve("netease", "collect", "1", Quality::Medium).await;

    assert!(matches!(result, SongList::Failed(ref msg) if msg.starts_with("invalid request arguments")));
    assert_eq!(h.backend.get_count(), 0);
}
