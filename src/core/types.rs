//! # Core Types
//!
//! Provider-agnostic data structures shared by the registry, the aggregator,
//! the provider adapters and the HTTP front end.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::core::error::{GatewayError, GatewayResult};

/// Upstream music providers known to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Xiami,
    Netease,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Xiami, Provider::Netease];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xiami => "xiami",
            Self::Netease => "netease",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = GatewayError;

    fn from_str(s: &str) -> GatewayResult<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GatewayError::invalid_argument("provider", format!("unknown provider '{}'", s)))
    }
}

/// Shapes of content that can be requested from a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    SongList,
    Album,
    Collect,
    PlayList,
}

impl RequestType {
    pub const ALL: [RequestType; 4] = [
        RequestType::SongList,
        RequestType::Album,
        RequestType::Collect,
        RequestType::PlayList,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SongList => "songlist",
            Self::Album => "album",
            Self::Collect => "collect",
            Self::PlayList => "playlist",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = GatewayError;

    fn from_str(s: &str) -> GatewayResult<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                GatewayError::invalid_argument("request_type", format!("unknown request type '{}'", s))
            })
    }
}

/// Requested audio quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl Quality {
    /// Parse the quality query parameter. Anything unrecognized means the default.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::Medium
    }
}

/// A normalized song record produced by a provider adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub lrc_url: String,
    pub artists: String,
    pub provider: String,
}

impl Song {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        artists: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            lrc_url: String::new(),
            artists: artists.into(),
            provider: provider.into(),
        }
    }
}

/// Ordered result set of a request: either songs or a failure message.
///
/// Serializes to `{"status": "ok"|"failed", "msg": "...", "songs": [...]}`,
/// which is both the HTTP response body and the cached blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SongList {
    Ok(Vec<Song>),
    Failed(String),
}

impl Default for SongList {
    fn default() -> Self {
        Self::Ok(Vec::new())
    }
}

impl SongList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a failed result and log its message
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(msg = %message, "Request failed");
        Self::Failed(message)
    }

    /// Build a failed result from a gateway error
    pub fn from_error(err: &GatewayError) -> Self {
        if err.is_user_facing() {
            debug!(error = %err, "Rejected request arguments");
            return Self::Failed(err.to_string());
        }
        Self::failed(err.to_string())
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Songs of a successful result; failed results expose none.
    pub fn songs(&self) -> &[Song] {
        match self {
            Self::Ok(songs) => songs,
            Self::Failed(_) => &[],
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Ok(_) => "",
            Self::Failed(msg) => msg,
        }
    }

    pub fn len(&self) -> usize {
        self.songs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs().is_empty()
    }

    /// Append a song. No-op on a failed result.
    pub fn push(&mut self, song: Song) {
        if let Self::Ok(songs) = self {
            songs.push(song);
        }
    }

    /// Concatenate two results.
    ///
    /// An empty right-hand side leaves `self` unchanged. A failed `self` stays
    /// failed. A failed right-hand side replaces `self`. Otherwise songs are
    /// appended in order.
    pub fn concat(self, other: SongList) -> SongList {
        match (self, other) {
            (left @ SongList::Failed(_), _) => left,
            (_, right @ SongList::Failed(_)) => right,
            (SongList::Ok(mut left), SongList::Ok(right)) => {
                left.extend(right);
                SongList::Ok(left)
            }
        }
    }

    /// Serialize to the wire representation
    pub fn to_json_bytes(&self) -> GatewayResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a wire representation, e.g. a cached response
    pub fn from_json_bytes(bytes: &[u8]) -> GatewayResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl FromIterator<Song> for SongList {
    fn from_iter<I: IntoIterator<Item = Song>>(iter: I) -> Self {
        Self::Ok(iter.into_iter().collect())
    }
}

#[derive(Serialize)]
struct SongListRef<'a> {
    status: &'static str,
    msg: &'a str,
    songs: &'a [Song],
}

#[derive(Deserialize)]
struct SongListOwned {
    status: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    songs: Vec<Song>,
}

const STATUS_OK: &str = "ok";
const STATUS_FAILED: &str = "failed";

impl Serialize for SongList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            Self::Ok(songs) => SongListRef {
                status: STATUS_OK,
                msg: "",
                songs,
            },
            Self::Failed(msg) => SongListRef {
                status: STATUS_FAILED,
                msg,
                songs: &[],
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SongList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = SongListOwned::deserialize(deserializer)?;
        match wire.status.as_str() {
            STATUS_OK if wire.msg.is_empty() => Ok(Self::Ok(wire.songs)),
            STATUS_OK | STATUS_FAILED => Ok(Self::Failed(wire.msg)),
            other => Err(serde::de::Error::custom(format!("unknown status '{}'", other))),
        }
    }
}
