//! # Error Handling Module
//!
//! This module defines the error taxonomy of the gateway using the `thiserror` crate.
//!
//! ## Error Classes
//! - `InvalidArgument`: empty or unsupported id, provider or request type. Always
//!   user-facing and reported inside a failed `SongList`, never as an HTTP error.
//! - `UpstreamUnavailable`: the cache backend or a provider could not be reached.
//! - `Parse`: an upstream payload could not be decoded.
//! - `CacheCorruption`: a cached blob could not be decompressed or deserialized.
//!   Callers treat it exactly like a cache miss.
//!
//! Per-request errors are recovered at the aggregation boundary and turned into a
//! failed `SongList`. Only configuration errors are fatal, and only at startup.

use std::convert::Infallible;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error types for the music gateway
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Configuration-related errors (invalid config, missing files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Empty or unsupported request arguments
    #[error("Invalid argument: {field} - {reason}")]
    InvalidArgument { field: String, reason: String },

    /// Upstream provider or cache backend is unreachable
    #[error("Upstream unavailable: {service} - {reason}")]
    UpstreamUnavailable { service: String, reason: String },

    /// Malformed upstream payload
    #[error("Failed to parse response from {url}: {reason}")]
    Parse { url: String, reason: String },

    /// Cached data that cannot be decoded
    #[error("Cache corruption: {message}")]
    CacheCorruption { message: String },

    /// Cache backend failures that are not corruption
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// Operation timeout
    #[error("Operation timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// I/O errors (file operations, sockets, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// HTTP client errors when making upstream requests
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid argument error for the given field
    pub fn invalid_argument<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an upstream unavailable error
    pub fn upstream_unavailable<S: Into<String>, R: Into<String>>(service: S, reason: R) -> Self {
        Self::UpstreamUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Create a parse error for the payload fetched from `url`
    pub fn parse<U: Into<String>, R: Into<String>>(url: U, reason: R) -> Self {
        Self::Parse {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a cache corruption error
    pub fn cache_corruption<S: Into<String>>(message: S) -> Self {
        Self::CacheCorruption {
            message: message.into(),
        }
    }

    /// Whether the error is caused by the client's request rather than by the gateway
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    /// Whether a cache read that produced this error should fall through to a fetch
    pub fn is_cache_miss_equivalent(&self) -> bool {
        matches!(
            self,
            Self::CacheCorruption { .. } | Self::Cache { .. } | Self::Timeout { .. }
        )
    }
}

impl From<Infallible> for GatewayError {
    fn from(infallible: Infallible) -> Self {
        match infallible {}
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::upstream_unavailable("http", format!("request timed out: {}", err));
        }
        Self::HttpClient {
            message: err.to_string(),
        }
    }
}
