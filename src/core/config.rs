//! # Configuration Module
//!
//! This module handles configuration loading for the gateway.
//!
//! ## Key Features
//! - YAML configuration parsing with serde
//! - Human readable durations (`30s`, `1h`) via `humantime-serde`
//! - Environment variable override support
//! - Validation that reports every problem at once

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::core::connection_pool::RedisPoolConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::config::{LogOutput, ObservabilityConfig};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "MUSIC_GATEWAY_CONFIG";

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/gateway.yaml";

/// Main gateway configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP listener configuration
    pub server: ServerConfig,

    /// Cache backend and key family settings
    pub cache: CacheConfig,

    /// Upstream provider settings
    pub upstream: UpstreamConfig,

    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: String,

    /// Port to listen on
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 9099,
        }
    }
}

/// Which cache backend to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Remote Redis server (production)
    Redis,
    /// Process-local store, for development and tests
    Memory,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backend kind
    pub backend: CacheBackendKind,

    /// Redis connection pool settings
    pub redis: RedisPoolConfig,

    /// Process-wide namespace prefix for every key
    pub key_prefix: String,

    /// Default expiry of cached entries, `0s` means no expiration
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// Gzip raw upstream bodies (url key family)
    pub compress_urls: bool,

    /// Gzip serialized responses (semantic id key family)
    pub compress_responses: bool,

    /// Cache serialized responses at all
    pub response_cache_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Redis,
            redis: RedisPoolConfig::default(),
            key_prefix: "mas:".to_string(),
            default_ttl: Duration::from_secs(3600),
            compress_urls: true,
            compress_responses: true,
            response_cache_enabled: true,
        }
    }
}

/// Upstream provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Overall timeout of a single upstream GET (connect + body)
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Xiami API base, request paths are appended to it
    pub xiami_api_base: String,

    /// Page answering with the `_xiamitoken` cookie
    pub xiami_token_url: String,

    /// Netease API base, request paths are appended to it
    pub netease_api_base: String,

    /// Netease CDN url template, `{eid}` and `{dfs_id}` are substituted
    pub netease_cdn_url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            xiami_api_base: "http://api.xiami.com/web?v=2.0&app_key=1&r=".to_string(),
            xiami_token_url: "http://m.xiami.com".to_string(),
            netease_api_base: "http://music.163.com/api".to_string(),
            netease_cdn_url: "http://m1.music.126.net/{eid}/{dfs_id}.mp3".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: GatewayConfig = serde_yaml::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration named by `MUSIC_GATEWAY_CONFIG`.
    ///
    /// A missing file at the default location falls back to the built-in
    /// defaults; a missing file that was named explicitly is an error.
    pub async fn load() -> GatewayResult<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load_from_file(path).await,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load_from_file(DEFAULT_CONFIG_PATH).await
            }
            Err(_) => {
                let mut config = Self::default();
                config.apply_env_overrides()?;
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: MUSIC_GATEWAY_<FIELD>
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_overrides<F>(&mut self, lookup: F) -> GatewayResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("MUSIC_GATEWAY_REDIS_URL") {
            self.cache.redis.url = url;
        }

        if let Some(port) = lookup("MUSIC_GATEWAY_HTTP_PORT") {
            self.server.http_port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid MUSIC_GATEWAY_HTTP_PORT: {}", e)))?;
        }

        if let Some(addr) = lookup("MUSIC_GATEWAY_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Some(ttl) = lookup("MUSIC_GATEWAY_CACHE_TTL") {
            self.cache.default_ttl = humantime::parse_duration(&ttl)
                .map_err(|e| GatewayError::config(format!("Invalid MUSIC_GATEWAY_CACHE_TTL: {}", e)))?;
        }

        if let Some(level) = lookup("MUSIC_GATEWAY_LOG_LEVEL") {
            self.observability.logging.level = level;
        }

        if let Some(file) = lookup("MUSIC_GATEWAY_LOG_FILE") {
            if !file.is_empty() {
                self.observability.logging.output = LogOutput::File(file);
            }
        }

        Ok(())
    }

    /// Configuration validation with detailed error messages
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("http_port must be greater than 0".to_string());
        }

        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }

        if self.cache.key_prefix.is_empty() {
            errors.push("cache.key_prefix cannot be empty".to_string());
        }

        if self.cache.backend == CacheBackendKind::Redis {
            if let Err(e) = Url::parse(&self.cache.redis.url) {
                errors.push(format!("cache.redis.url '{}' is invalid: {}", self.cache.redis.url, e));
            }
            if self.cache.redis.max_active == 0 {
                errors.push("cache.redis.max_active must be greater than 0".to_string());
            }
            if self.cache.redis.operation_timeout.is_zero() {
                errors.push("cache.redis.operation_timeout must be greater than 0".to_string());
            }
        }

        if self.upstream.request_timeout.is_zero() {
            errors.push("upstream.request_timeout must be greater than 0".to_string());
        }

        for (name, base) in [
            ("upstream.xiami_api_base", &self.upstream.xiami_api_base),
            ("upstream.xiami_token_url", &self.upstream.xiami_token_url),
            ("upstream.netease_api_base", &self.upstream.netease_api_base),
        ] {
            if let Err(e) = Url::parse(base) {
                errors.push(format!("{} '{}' is invalid: {}", name, base, e));
            }
        }

        if !self.upstream.netease_cdn_url.contains("{eid}")
            || !self.upstream.netease_cdn_url.contains("{dfs_id}")
        {
            errors.push("upstream.netease_cdn_url must contain {eid} and {dfs_id}".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}
