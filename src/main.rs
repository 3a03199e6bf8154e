//! # Music API Gateway - Main Entry Point
//!
//! Startup sequence:
//! 1. Load configuration (`MUSIC_GATEWAY_CONFIG`, then environment overrides)
//! 2. Initialize structured logging and the Prometheus recorder
//! 3. Build the cache backend (pooled Redis or in-memory) and the cache store
//! 4. Register the provider adapters and build the music service
//! 5. Serve HTTP until SIGINT or SIGTERM, then drain in-flight requests

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use music_api_gateway::caching::{CacheBackend, InMemoryCache, RedisCache};
use music_api_gateway::core::config::CacheBackendKind;
use music_api_gateway::core::connection_pool::RedisConnectionPool;
use music_api_gateway::gateway::shutdown_signal;
use music_api_gateway::observability::{init_logging, install_recorder};
use music_api_gateway::{AppState, CacheStore, GatewayConfig, GatewayResult, GatewayServer, MusicService};

#[tokio::main]
async fn main() -> GatewayResult<()> {
    let config = match GatewayConfig::load().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config.observability.logging)?;

    info!("🚀 Starting music API gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let (server, reaper) = match graceful_startup(config).await {
        Ok(started) => started,
        Err(e) => {
            error!("Failed to start gateway: {}", e);
            std::process::exit(1);
        }
    };

    let result = server.start(shutdown_signal()).await;

    if let Some(reaper) = reaper {
        reaper.abort();
    }

    match result {
        Ok(()) => info!("✅ Music API gateway shutdown complete"),
        Err(ref e) => error!("Server error: {}", e),
    }
    result
}

/// Build every component the server needs
async fn graceful_startup(config: GatewayConfig) -> GatewayResult<(GatewayServer, Option<JoinHandle<()>>)> {
    info!("🔧 Starting startup sequence...");

    let (backend, reaper) = build_cache_backend(&config).await?;
    let store = CacheStore::new(backend);

    let service = MusicService::from_config(&config, store)?;
    info!(
        handlers = service.aggregator().registry().len(),
        "✅ Provider registry ready"
    );

    let mut state = AppState::new(service);
    if config.observability.metrics.enabled {
        state = state.with_metrics(install_recorder()?);
        info!("📊 Metrics available on /metrics");
    }

    let server = GatewayServer::new(config.server.clone(), state);
    info!(
        "🌐 Gateway ready on {}:{}",
        config.server.bind_address, config.server.http_port
    );
    Ok((server, reaper))
}

/// Cache backend from configuration, with the pool reaper for Redis
async fn build_cache_backend(
    config: &GatewayConfig,
) -> GatewayResult<(Arc<dyn CacheBackend>, Option<JoinHandle<()>>)> {
    match config.cache.backend {
        CacheBackendKind::Redis => {
            let pool = Arc::new(RedisConnectionPool::new(config.cache.redis.clone())?);
            let reaper = pool.spawn_reaper();

            if pool.health_check().await {
                info!(url = %config.cache.redis.url, "✅ Redis reachable");
            } else {
                // Requests are still served, uncached, until Redis comes back.
                warn!(url = %config.cache.redis.url, "⚠️  Redis not reachable at startup");
            }

            Ok((Arc::new(RedisCache::new(pool)), Some(reaper)))
        }
        CacheBackendKind::Memory => {
            warn!("⚠️  Using in-memory cache backend, cached data is not shared or persisted");
            Ok((Arc::new(InMemoryCache::new()), None))
        }
    }
}
