//! # Xiami Adapter
//!
//! Song, album and collect lookups against the Xiami web API.
//!
//! Every API request carries mobile browser headers and the `_xiamitoken`
//! cookie. The token is obtained once, on the first cache miss, from the
//! `Set-Cookie` header of a HEAD request to the mobile site. It is added to the
//! outgoing request only, so cache keys do not depend on it.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, SET_COOKIE};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::into_song_list;
use crate::core::config::UpstreamConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Provider, RequestType, Song, SongList};
use crate::protocols::CachedFetcher;
use crate::routing::{HandlerRequest, IdMode, RegistryBuilder};

/// `provider` field of every Xiami song
pub const XIAMI_PROVIDER_URL: &str = "http://www.xiami.com/";

/// Delimiter of multi-id songlist requests
pub const SONG_ID_DELIMITER: char = ',';

const TOKEN_NAME: &str = "_xiamitoken";
const STATE_OK: i64 = 0;

const SONG_PATH: &str = "song/detail&id=";
const ALBUM_PATH: &str = "album/detail&id=";
const COLLECT_PATH: &str = "collect/detail&type=collectId&id=";

const MOBILE_HEADERS: &[(&str, &str)] = &[
    (
        "user-agent",
        "Mozilla/5.0 (iPhone; CPU iPhone OS 7_1_2 like Mac OS X) AppleWebKit/537.51.2 (KHTML, like Gecko) Version/7.0 Mobile/11D257 Safari/9537.53",
    ),
    ("referer", "http://m.xiami.com/"),
    ("x-requested-with", "XMLHttpRequest"),
    ("x-forwarded-for", "42.156.140.238"),
    ("client-ip", "42.156.140.238"),
];

fn mobile_headers() -> HeaderMap {
    MOBILE_HEADERS
        .iter()
        .map(|(name, value)| (HeaderName::from_static(name), HeaderValue::from_static(value)))
        .collect()
}

#[derive(Debug, Deserialize)]
struct XiamiResponse {
    #[serde(default)]
    state: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<XiamiData>,
}

#[derive(Debug, Default, Deserialize)]
struct XiamiData {
    #[serde(default)]
    songs: Option<Vec<XiamiSong>>,
    #[serde(default)]
    song: Option<XiamiSong>,
}

#[derive(Debug, Deserialize)]
struct XiamiSong {
    #[serde(default)]
    song_name: String,
    #[serde(default)]
    listen_file: String,
    #[serde(default)]
    singers: String,
}

impl From<XiamiSong> for Song {
    fn from(song: XiamiSong) -> Self {
        Song::new(song.song_name, song.listen_file, song.singers, XIAMI_PROVIDER_URL)
    }
}

/// Decode a Xiami API body fetched from `url`.
///
/// Album and collect answers carry `data.songs`, song answers `data.song`.
pub fn parse_response(url: &str, body: &[u8]) -> GatewayResult<Vec<Song>> {
    let response: XiamiResponse =
        serde_json::from_slice(body).map_err(|e| GatewayError::parse(url, e.to_string()))?;

    if response.state != STATE_OK {
        return Err(GatewayError::upstream_unavailable(
            url,
            response.message.unwrap_or_default(),
        ));
    }

    let data = response.data.unwrap_or_default();
    match (data.songs, data.song) {
        (Some(songs), _) if !songs.is_empty() => Ok(songs.into_iter().map(Song::from).collect()),
        (_, Some(song)) if !song.listen_file.is_empty() => Ok(vec![song.into()]),
        _ => Err(GatewayError::parse(url, "invalid xiami url")),
    }
}

/// Extract the token value from `Set-Cookie` headers
fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| name.trim() == TOKEN_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Xiami provider adapter
pub struct XiamiProvider {
    fetcher: CachedFetcher,
    api_base: String,
    token_url: String,
    token: OnceCell<String>,
}

impl XiamiProvider {
    pub fn new(fetcher: CachedFetcher, upstream: &UpstreamConfig) -> Self {
        Self {
            fetcher,
            api_base: upstream.xiami_api_base.clone(),
            token_url: upstream.xiami_token_url.clone(),
            token: OnceCell::new(),
        }
    }

    /// Register songlist, album and collect handlers
    pub fn register(self: Arc<Self>, builder: RegistryBuilder) -> RegistryBuilder {
        let provider = Provider::Xiami.as_str();
        let songs = self.clone();
        let albums = self.clone();
        let collects = self;

        builder
            .register(
                provider,
                RequestType::SongList.as_str(),
                IdMode::Multi {
                    delimiter: SONG_ID_DELIMITER,
                },
                move |req: HandlerRequest| {
                    let adapter = songs.clone();
                    async move { adapter.song(&req.id).await }
                },
            )
            .register(provider, RequestType::Album.as_str(), IdMode::Single, move |req: HandlerRequest| {
                let adapter = albums.clone();
                async move { adapter.album(&req.id).await }
            })
            .register(provider, RequestType::Collect.as_str(), IdMode::Single, move |req: HandlerRequest| {
                let adapter = collects.clone();
                async move { adapter.collect(&req.id).await }
            })
    }

    pub async fn song(&self, id: &str) -> SongList {
        self.lookup(SONG_PATH, id).await
    }

    pub async fn album(&self, id: &str) -> SongList {
        self.lookup(ALBUM_PATH, id).await
    }

    pub async fn collect(&self, id: &str) -> SongList {
        self.lookup(COLLECT_PATH, id).await
    }

    async fn lookup(&self, path: &str, id: &str) -> SongList {
        let url = format!("{}{}{}", self.api_base, path, id.trim());
        into_song_list(self.fetch_songs(&url).await)
    }

    async fn fetch_songs(&self, url: &str) -> GatewayResult<Vec<Song>> {
        let body = self
            .fetcher
            .fetch_with(url, || async {
                let token = self.token().await?;
                let cookie = format!("{}={}", TOKEN_NAME, token);
                Ok(self
                    .fetcher
                    .client()
                    .get(format!("{}&{}", url, cookie))
                    .headers(mobile_headers())
                    .header(COOKIE, cookie))
            })
            .await?;
        parse_response(url, &body)
    }

    /// Session token, fetched on first use. A failed attempt is retried by the next caller.
    async fn token(&self) -> GatewayResult<&str> {
        let token = self
            .token
            .get_or_try_init(|| async {
                debug!(url = %self.token_url, "Requesting xiami token");
                let response = self
                    .fetcher
                    .client()
                    .head(&self.token_url)
                    .headers(mobile_headers())
                    .send()
                    .await
                    .map_err(|e| {
                        warn!(url = %self.token_url, error = %e, "Failed to request xiami token");
                        GatewayError::upstream_unavailable(&self.token_url, e.to_string())
                    })?;

                let token = token_from_headers(response.headers()).ok_or_else(|| {
                    warn!(url = %self.token_url, "No xiami token in response cookies");
                    GatewayError::upstream_unavailable(&self.token_url, "no xiami token in response cookies")
                })?;
                info!("Xiami token acquired");
                Ok::<_, GatewayError>(token)
            })
            .await?;
        Ok(token.as_str())
    }
}
