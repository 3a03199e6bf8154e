//! # Netease Adapter
//!
//! Songlist, album and playlist lookups against the Netease cloud music API.
//!
//! A songlist is fetched with one request for all ids. Requests for `low` or
//! `high` quality rewrite each song url to the CDN location of the matching
//! bitrate, which is derived from the encrypted dfsId ("eid"). Eids never
//! change, so they are cached without expiry or compression.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use md5::{Digest, Md5};
use reqwest::header::COOKIE;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::into_song_list;
use crate::core::config::UpstreamConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Provider, Quality, RequestType, Song, SongList};
use crate::protocols::CachedFetcher;
use crate::routing::{HandlerRequest, IdMode, RegistryBuilder};

/// `provider` field of every Netease song
pub const NETEASE_PROVIDER_URL: &str = "http://music.163.com/";

const CODE_OK: i64 = 200;
const EID_KEY: &[u8] = b"3go8&$8*3*3h0k(2)2";
const API_COOKIES: &str =
    "appver=1.4.1.62460; os=pc; osver=Microsoft-Windows-7-Ultimate-Edition-build-7600-64bit";

/// Encrypted id of a dfsId: XOR with a fixed key, MD5, base64 with `/`→`_` and `+`→`-`
pub fn encrypt_dfs_id(dfs_id: &str) -> String {
    let xored: Vec<u8> = dfs_id
        .bytes()
        .zip(EID_KEY.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect();
    let digest = Md5::digest(&xored);
    BASE64.encode(digest).replace('/', "_").replace('+', "-")
}

#[derive(Debug, Deserialize)]
struct NeteaseResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    songs: Option<Vec<NeteaseSong>>,
    #[serde(default)]
    album: Option<NeteaseAlbum>,
    #[serde(default)]
    result: Option<NeteasePlayList>,
}

#[derive(Debug, Deserialize)]
struct NeteaseAlbum {
    #[serde(default)]
    songs: Option<Vec<NeteaseSong>>,
}

#[derive(Debug, Deserialize)]
struct NeteasePlayList {
    #[serde(default)]
    tracks: Option<Vec<NeteaseSong>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct NeteaseArtist {
    #[serde(default)]
    name: String,
}

/// Bitrate variant of a song
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MusicDetail {
    #[serde(default)]
    pub bitrate: u64,
    #[serde(default, rename = "dfsId")]
    pub dfs_id: u64,
}

/// Song as returned by the API, before url rewriting
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NeteaseSong {
    #[serde(default)]
    artists: Vec<NeteaseArtist>,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "mp3Url")]
    pub mp3_url: Option<String>,
    #[serde(default, rename = "hMusic")]
    pub high: Option<MusicDetail>,
    #[serde(default, rename = "mMusic")]
    pub medium: Option<MusicDetail>,
    #[serde(default, rename = "lMusic")]
    pub low: Option<MusicDetail>,
}

impl NeteaseSong {
    pub fn artists(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Variant to rewrite the url to; `None` keeps `mp3Url`
    pub fn detail_for(&self, quality: Quality) -> Option<MusicDetail> {
        let detail = match quality {
            Quality::Medium => return None,
            Quality::Low => self.low,
            Quality::High => self.high,
        };
        detail.filter(|d| d.dfs_id != 0)
    }
}

/// Decode a Netease API body fetched from `url` for `request_type`
pub fn parse_response(request_type: RequestType, url: &str, body: &[u8]) -> GatewayResult<Vec<NeteaseSong>> {
    let response: NeteaseResponse =
        serde_json::from_slice(body).map_err(|e| GatewayError::parse(url, e.to_string()))?;

    if response.code != CODE_OK {
        return Err(GatewayError::upstream_unavailable(
            url,
            response.message.unwrap_or_default(),
        ));
    }

    let songs = match request_type {
        RequestType::Album => response.album.and_then(|a| a.songs),
        RequestType::PlayList => response.result.and_then(|r| r.tracks),
        RequestType::SongList | RequestType::Collect => response.songs,
    };
    Ok(songs.unwrap_or_default())
}

/// Netease provider adapter
pub struct NeteaseProvider {
    fetcher: CachedFetcher,
    api_base: String,
    cdn_url: String,
}

impl NeteaseProvider {
    pub fn new(fetcher: CachedFetcher, upstream: &UpstreamConfig) -> Self {
        Self {
            fetcher,
            api_base: upstream.netease_api_base.trim_end_matches('/').to_string(),
            cdn_url: upstream.netease_cdn_url.clone(),
        }
    }

    /// Register songlist, album and playlist handlers
    pub fn register(self: Arc<Self>, builder: RegistryBuilder) -> RegistryBuilder {
        let provider = Provider::Netease.as_str();
        let songs = self.clone();
        let albums = self.clone();
        let playlists = self;

        builder
            .register(provider, RequestType::SongList.as_str(), IdMode::Single, move |req: HandlerRequest| {
                let adapter = songs.clone();
                async move { adapter.songlist(&req.id, req.quality).await }
            })
            .register(provider, RequestType::Album.as_str(), IdMode::Single, move |req: HandlerRequest| {
                let adapter = albums.clone();
                async move { adapter.album(&req.id, req.quality).await }
            })
            .register(provider, RequestType::PlayList.as_str(), IdMode::Single, move |req: HandlerRequest| {
                let adapter = playlists.clone();
                async move { adapter.playlist(&req.id, req.quality).await }
            })
    }

    /// All ids of a comma separated list in one request
    pub async fn songlist(&self, ids: &str, quality: Quality) -> SongList {
        let url = format!("{}/song/detail?ids=[{}]", self.api_base, ids.trim());
        self.lookup(RequestType::SongList, &url, quality).await
    }

    pub async fn album(&self, id: &str, quality: Quality) -> SongList {
        let url = format!("{}/album/{}", self.api_base, id.trim());
        self.lookup(RequestType::Album, &url, quality).await
    }

    pub async fn playlist(&self, id: &str, quality: Quality) -> SongList {
        let url = format!("{}/playlist/detail?id={}", self.api_base, id.trim());
        self.lookup(RequestType::PlayList, &url, quality).await
    }

    async fn lookup(&self, request_type: RequestType, url: &str, quality: Quality) -> SongList {
        into_song_list(self.fetch_songs(request_type, url, quality).await)
    }

    async fn fetch_songs(&self, request_type: RequestType, url: &str, quality: Quality) -> GatewayResult<Vec<Song>> {
        let request = self.fetcher.client().get(url).header(COOKIE, API_COOKIES);
        let body = self.fetcher.fetch_request(url, request).await?;

        let mut songs = Vec::new();
        for raw in parse_response(request_type, url, &body)? {
            let url = match raw.detail_for(quality) {
                Some(detail) => self.cdn_url(detail.dfs_id).await,
                None => raw.mp3_url.clone().unwrap_or_default(),
            };
            songs.push(Song::new(raw.name.clone(), url, raw.artists(), NETEASE_PROVIDER_URL));
        }
        Ok(songs)
    }

    /// CDN url of a bitrate variant
    pub async fn cdn_url(&self, dfs_id: u64) -> String {
        let dfs_id = dfs_id.to_string();
        let eid = self.eid(&dfs_id).await;
        self.cdn_url.replace("{eid}", &eid).replace("{dfs_id}", &dfs_id)
    }

    async fn eid(&self, dfs_id: &str) -> String {
        let store = self.fetcher.store();
        let key = match self.fetcher.codec().key_for_netease_eid(dfs_id) {
            Ok(key) => key,
            Err(_) => return encrypt_dfs_id(dfs_id),
        };

        match store.get(&key, false).await {
            Ok(Some(eid)) => match String::from_utf8(eid) {
                Ok(eid) if !eid.is_empty() => return eid,
                _ => debug!(key = %key, "Ignoring malformed cached eid"),
            },
            Ok(None) => {}
            Err(e) => debug!(key = %key, error = %e, "Eid cache read failed"),
        }

        let eid = encrypt_dfs_id(dfs_id);
        if let Err(e) = store.set(&key, eid.as_bytes(), Duration::ZERO, false).await {
            warn!(key = %key, error = %e, "Failed to cache eid");
        }
        eid
    }
}
