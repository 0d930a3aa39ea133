//! # Redis Cache Store
//!
//! Redis-backed [`CacheStore`] built on the async `ConnectionManager`.
//!
//! The store tracks two flags, `connected` and `ready`, the way the availability
//! prober expects them. A watcher task pings the server on an interval,
//! establishes the connection when it is missing and flips the flags on failure,
//! so an outage is noticed without every request paying for a failed command.

use super::CacheStore;
use crate::caching::{CacheError, CacheResult};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Redis cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// Redis connection URL, a `/N` path selects the logical database
    pub url: String,

    /// Connection establishment timeout
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// Interval of the watcher's ping
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(5),
        }
    }
}

/// Redis cache implementation
pub struct RedisStore {
    config: RedisStoreConfig,
    client: Client,

    /// Established connection, `None` until the first successful connect
    connection: RwLock<Option<ConnectionManager>>,

    connected: AtomicBool,
    ready: AtomicBool,
}

impl RedisStore {
    /// Create a store without connecting. Fails only on a malformed URL.
    pub fn new(config: RedisStoreConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| CacheError::Configuration {
            message: format!("Invalid Redis URL '{}': {}", config.url, e),
        })?;

        Ok(Self {
            config,
            client,
            connection: RwLock::new(None),
            connected: AtomicBool::new(false),
            ready: AtomicBool::new(false),
        })
    }

    /// Create a store, attempt the first connection and start the watcher.
    ///
    /// A failed first attempt is logged, not returned: the gateway serves
    /// uncached until the watcher gets through.
    pub async fn connect(config: RedisStoreConfig) -> CacheResult<Arc<Self>> {
        let store = Arc::new(Self::new(config)?);

        if let Err(e) = store.establish().await {
            warn!("Redis not reachable at {}: {}", store.config.url, e);
        }

        store.spawn_watcher();
        Ok(store)
    }

    /// Start the background task that keeps the connectivity flags current.
    /// The task ends when the store is dropped.
    pub fn spawn_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        let period = self.config.health_check_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                interval.tick().await;
                match store.upgrade() {
                    Some(store) => store.refresh().await,
                    None => break,
                }
            }
        })
    }

    /// Establish a connection and run the readiness check
    async fn establish(&self) -> CacheResult<()> {
        let manager = tokio::time::timeout(
            self.config.connection_timeout,
            ConnectionManager::new(self.client.clone()),
        )
        .await
        .map_err(|_| CacheError::Timeout {
            operation: "connect",
            after: self.config.connection_timeout,
        })??;

        *self.connection.write().await = Some(manager.clone());
        self.connected.store(true, Ordering::SeqCst);
        info!("Successfully connected to Redis at {}", self.config.url);

        let mut conn = manager;
        let pong = redis::cmd("PING").query_async::<_, String>(&mut conn).await;
        let pong = self.observe(pong)?;
        if pong == "PONG" {
            self.ready.store(true, Ordering::SeqCst);
            info!("Redis client is ready");
        }
        Ok(())
    }

    /// One watcher round
    async fn refresh(&self) {
        let existing = self.connection.read().await.clone();

        match existing {
            None => {
                if let Err(e) = self.establish().await {
                    debug!("Reconnecting to Redis failed: {}", e);
                }
            }
            Some(mut conn) => {
                let was_up = self.is_ready();
                match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
                    Ok(_) => {
                        self.connected.store(true, Ordering::SeqCst);
                        self.ready.store(true, Ordering::SeqCst);
                        if !was_up {
                            info!("Redis connection restored");
                        }
                    }
                    Err(e) => {
                        self.mark_down();
                        if was_up {
                            error!("Redis connection error: {}", e);
                        }
                    }
                }
            }
        }
    }

    fn mark_down(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Record connection-level failures in the flags and convert the error
    fn observe<T>(&self, result: RedisResult<T>) -> CacheResult<T> {
        result.map_err(|e| {
            if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
                warn!("Redis connection closed: {}", e);
                self.mark_down();
            }
            CacheError::Redis(e)
        })
    }

    async fn connection(&self) -> CacheResult<ConnectionManager> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or(CacheError::Unavailable)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("PING").query_async::<_, String>(&mut conn).await;
        let pong = self.observe(result)?;

        if pong == "PONG" {
            Ok(())
        } else {
            Err(CacheError::backend(format!("Unexpected PING reply: {}", pong)))
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection().await?;
        let result = conn.get::<_, Option<String>>(key).await;
        self.observe(result)
    }

    async fn set_with_ttl(&self, key: &str, ttl_seconds: u64, value: &str) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_seconds)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await;
        self.observe(result)?;

        debug!("Set Redis cache key: {} with TTL: {}s", key, ttl_seconds);
        Ok(())
    }

    async fn find_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.connection().await?;
        let result = conn.keys::<_, Vec<String>>(pattern).await;
        self.observe(result)
    }

    async fn delete_keys(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection().await?;
        let result = conn.del::<_, u64>(keys).await;
        let deleted = self.observe(result)?;

        debug!("Deleted {} Redis cache keys", deleted);
        Ok(deleted)
    }

    async fn info(&self) -> CacheResult<String> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("INFO").query_async::<_, String>(&mut conn).await;
        self.observe(result)
    }

    async fn key_count(&self) -> CacheResult<u64> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("DBSIZE").query_async::<_, u64>(&mut conn).await;
        self.observe(result)
    }
}
