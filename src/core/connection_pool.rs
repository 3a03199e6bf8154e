//! # Connection Pool Module
//!
//! Pooled connections to the Redis cache backend.
//!
//! The pool is an explicitly constructed handle: it is built at startup, passed
//! by `Arc` to the cache store, and torn down when the last handle is dropped.
//!
//! ## Rust Concepts Used
//!
//! - `tokio::sync::Semaphore` bounds the number of connections checked out at once
//! - `parking_lot::Mutex<VecDeque<_>>` holds idle connections; it is never held across `.await`
//! - `Drop` on [`PooledConnection`] returns the connection on every exit path,
//!   including a caller abandoning the future mid-command

use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{Client, FromRedisValue};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use metrics::{counter, gauge};

use crate::core::error::{GatewayError, GatewayResult};

/// Configuration for the Redis connection pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisPoolConfig {
    /// Redis connection URL
    pub url: String,
    /// Maximum number of idle connections kept for reuse
    pub max_idle: usize,
    /// Maximum number of connections checked out at the same time
    pub max_active: usize,
    /// Idle connections older than this are closed
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Timeout for establishing a new connection and for waiting on a free slot
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Timeout of a single command round trip
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
    /// Send PING before handing out an idle connection
    pub test_on_borrow: bool,
    /// How often the reaper closes expired idle connections
    #[serde(with = "humantime_serde")]
    pub reaper_interval: Duration,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            max_idle: 3,
            max_active: 64,
            idle_timeout: Duration::from_secs(240),
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(2),
            test_on_borrow: true,
            reaper_interval: Duration::from_secs(60),
        }
    }
}

/// A connection resting in the pool
struct IdleConnection {
    conn: MultiplexedConnection,
    id: u64,
    last_used: Instant,
}

impl IdleConnection {
    fn is_expired(&self, idle_timeout: Duration) -> bool {
        !idle_timeout.is_zero() && self.last_used.elapsed() > idle_timeout
    }
}

struct PoolShared {
    idle: Mutex<VecDeque<IdleConnection>>,
    config: RedisPoolConfig,
}

impl PoolShared {
    fn cleanup_expired(&self) -> usize {
        let mut idle = self.idle.lock();
        let before = idle.len();
        idle.retain(|c| !c.is_expired(self.config.idle_timeout));
        let cleaned = before - idle.len();
        gauge!("redis_pool_idle_connections").set(idle.len() as f64);
        cleaned
    }
}

/// Pool of connections to one Redis server
pub struct RedisConnectionPool {
    client: Client,
    shared: Arc<PoolShared>,
    semaphore: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl RedisConnectionPool {
    /// Create a new pool. No connection is opened until the first checkout.
    pub fn new(config: RedisPoolConfig) -> GatewayResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| GatewayError::config(format!("Invalid redis url '{}': {}", config.url, e)))?;

        info!(url = %config.url, max_idle = config.max_idle, max_active = config.max_active, "Redis connection pool created");

        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.max_active.max(1))),
            shared: Arc::new(PoolShared {
                idle: Mutex::new(VecDeque::new()),
                config,
            }),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &RedisPoolConfig {
        &self.shared.config
    }

    /// Check out a connection: reuse a live idle one or open a new one.
    pub async fn get(&self) -> GatewayResult<PooledConnection> {
        let config = &self.shared.config;

        let permit = timeout(config.connect_timeout, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| GatewayError::Timeout {
                timeout_ms: config.connect_timeout.as_millis() as u64,
            })?
            .map_err(|e| GatewayError::upstream_unavailable("redis", format!("pool closed: {}", e)))?;

        loop {
            let candidate = self.shared.idle.lock().pop_back();
            let Some(mut idle) = candidate else { break };

            if idle.is_expired(config.idle_timeout) {
                counter!("redis_pool_expired").increment(1);
                debug!(connection_id = idle.id, "Discarded expired redis connection");
                continue;
            }

            if config.test_on_borrow {
                let probe = timeout(
                    config.operation_timeout,
                    redis::cmd("PING").query_async::<_, String>(&mut idle.conn),
                )
                .await;
                if !matches!(probe, Ok(Ok(_))) {
                    counter!("redis_pool_probe_failed").increment(1);
                    warn!(connection_id = idle.id, "Redis liveness probe failed, discarding connection");
                    continue;
                }
            }

            counter!("redis_pool_reused").increment(1);
            return Ok(PooledConnection::new(idle.conn, idle.id, &self.shared, permit));
        }

        let conn = timeout(config.connect_timeout, self.client.get_multiplexed_async_connection())
            .await
            .map_err(|_| GatewayError::Timeout {
                timeout_ms: config.connect_timeout.as_millis() as u64,
            })?
            .map_err(|e| {
                warn!(url = %config.url, error = %e, "Failed to connect to redis server");
                GatewayError::upstream_unavailable("redis", e.to_string())
            })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        counter!("redis_pool_created").increment(1);
        debug!(connection_id = id, url = %config.url, "Opened new redis connection");

        Ok(PooledConnection::new(conn, id, &self.shared, permit))
    }

    /// Number of idle connections currently pooled
    pub fn idle_count(&self) -> usize {
        self.shared.idle.lock().len()
    }

    /// Number of connections that can still be checked out
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Close idle connections past their idle timeout
    pub fn cleanup_expired(&self) -> usize {
        self.shared.cleanup_expired()
    }

    /// Periodically close expired idle connections. Stops when the pool is dropped.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let shared: Weak<PoolShared> = Arc::downgrade(&self.shared);
        let period = self.shared.config.reaper_interval.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else { break };
                let cleaned = shared.cleanup_expired();
                if cleaned > 0 {
                    counter!("redis_pool_cleaned_up").increment(cleaned as u64);
                    debug!(cleaned_count = cleaned, "Closed expired idle redis connections");
                }
            }
        })
    }

    /// PING round trip through a pooled connection
    pub async fn health_check(&self) -> bool {
        match self.get().await {
            Ok(mut conn) => matches!(
                conn.query::<String>(&redis::cmd("PING")).await.as_deref(),
                Ok("PONG")
            ),
            Err(_) => false,
        }
    }
}

/// A checked-out connection. Returned to the pool when dropped, unless broken.
pub struct PooledConnection {
    conn: Option<MultiplexedConnection>,
    id: u64,
    healthy: bool,
    shared: Arc<PoolShared>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(
        conn: MultiplexedConnection,
        id: u64,
        shared: &Arc<PoolShared>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            conn: Some(conn),
            id,
            healthy: true,
            shared: shared.clone(),
            _permit: permit,
        }
    }

    /// Pool-local id, stable for the lifetime of the underlying connection
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run one command with the pool's operation timeout.
    ///
    /// The connection is considered broken while the command is in flight, so
    /// a caller abandoning this future never returns a half-used connection.
    pub async fn query<T: FromRedisValue>(&mut self, cmd: &redis::Cmd) -> GatewayResult<T> {
        let operation_timeout = self.shared.config.operation_timeout;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| GatewayError::upstream_unavailable("redis", "connection already released"))?;

        self.healthy = false;
        let result = timeout(operation_timeout, cmd.query_async::<_, T>(conn)).await;

        match result {
            Ok(Ok(value)) => {
                self.healthy = true;
                Ok(value)
            }
            Ok(Err(e)) => {
                // Server-side errors (wrong type, bad args) leave the connection usable.
                self.healthy = !(e.is_io_error() || e.is_connection_dropped() || e.is_timeout());
                Err(GatewayError::upstream_unavailable("redis", e.to_string()))
            }
            Err(_) => Err(GatewayError::Timeout {
                timeout_ms: operation_timeout.as_millis() as u64,
            }),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else { return };

        if !self.healthy {
            counter!("redis_pool_discarded").increment(1);
            debug!(connection_id = self.id, "Discarded broken redis connection");
            return;
        }

        let mut idle = self.shared.idle.lock();
        if idle.len() < self.shared.config.max_idle {
            idle.push_back(IdleConnection {
                conn,
                id: self.id,
                last_used: Instant::now(),
            });
            counter!("redis_pool_returned").increment(1);
        }
        gauge!("redis_pool_idle_connections").set(idle.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> RedisPoolConfig {
        RedisPoolConfig {
            // Nothing listens on port 1; connects are refused immediately.
            url: "redis://127.0.0.1:1".to_string(),
            max_active: 1,
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = RedisPoolConfig::default();
        assert_eq!(config.max_idle, 3);
        assert_eq!(config.idle_timeout, Duration::from_secs(240));
        assert!(config.test_on_borrow);
    }

    #[test]
    fn test_invalid_url_is_configuration_error() {
        let result = RedisConnectionPool::new(RedisPoolConfig {
            url: "definitely not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(GatewayError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_failed_checkout_releases_permit() {
        let pool = RedisConnectionPool::new(unreachable_config()).unwrap();

        assert!(pool.get().await.is_err());
        assert_eq!(pool.available_permits(), 1);

        // A leaked permit would make this second checkout time out instead.
        let second = pool.get().await;
        assert!(matches!(second, Err(GatewayError::UpstreamUnavailable { .. })));
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        let pool = RedisConnectionPool::new(unreachable_config()).unwrap();
        assert!(!pool.health_check().await);
    }

    #[test]
    fn test_zero_idle_timeout_cleans_nothing() {
        let shared = PoolShared {
            idle: Mutex::new(VecDeque::new()),
            config: RedisPoolConfig {
                idle_timeout: Duration::ZERO,
                ..Default::default()
            },
        };
        // Zero idle timeout disables expiry; nothing to clean.
        assert_eq!(shared.cleanup_expired(), 0);
    }
}
