//! # Cache Stores Module
//!
//! The key/value backends the response cache talks to. The cache layer only
//! relies on the primitive operations of [`CacheStore`]; persistence, expiry and
//! replication belong to the backend.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::{RedisStore, RedisStoreConfig};

use super::CacheResult;
use async_trait::async_trait;

/// Trait for cache store implementations
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Whether a connection to the backend is currently established
    fn is_connected(&self) -> bool;

    /// Whether the backend has answered its readiness check
    fn is_ready(&self) -> bool;

    /// Lightweight liveness probe
    async fn ping(&self) -> CacheResult<()>;

    /// Get the stored string for a key
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store a value that expires after `ttl_seconds`
    async fn set_with_ttl(&self, key: &str, ttl_seconds: u64, value: &str) -> CacheResult<()>;

    /// Find keys matching a glob-style pattern
    async fn find_keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Delete the given keys, returning how many existed
    async fn delete_keys(&self, keys: &[String]) -> CacheResult<u64>;

    /// Server information in Redis INFO text format
    async fn info(&self) -> CacheResult<String>;

    /// Number of keys held by the backend
    async fn key_count(&self) -> CacheResult<u64>;
}
