//! # Response Caching Module
//!
//! Cache-aside caching for JSON endpoints, backed by an external key/value store.
//!
//! ## Architecture
//! 1. **Stores**: the [`CacheStore`] trait with Redis and in-memory implementations
//! 2. **Availability**: a prober that reports whether the store can be used right now
//! 3. **Key generation**: `prefix + ":" + path` with `/` replaced by `:`
//! 4. **Middleware**: a tower layer that serves hits and writes misses back in the background
//! 5. **Invalidation**: pattern based bulk delete
//! 6. **Monitor**: statistics derived from the store's INFO output
//!
//! Every store call on the request path is bounded by its own deadline. Cache
//! failures never reach the clients of cached endpoints; only invalidation
//! reports errors to its caller.
//!
//! ## Usage Example
//! ```rust,ignore
//! let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
//! let cache = ResponseCache::new(store, KeyNamespace::none(), CachePolicy::default());
//!
//! let app = Router::new().route(
//!     "/tables",
//!     get(list_tables).layer(cache.layer("tables", 3600)),
//! );
//! ```

pub mod availability;
pub mod invalidation;
pub mod key_generator;
pub mod middleware;
pub mod monitor;
pub mod stores;

pub use availability::AvailabilityProber;
pub use invalidation::Invalidator;
pub use key_generator::{build_key, KeyNamespace};
pub use middleware::{CacheLayer, CachePolicy, CacheService, ResponseCache};
pub use monitor::{CacheMonitor, CacheStats};
pub use stores::{CacheStore, MemoryStore, RedisStore, RedisStoreConfig};

use std::future::Future;
use std::time::Duration;

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend error: {message}")]
    Backend { message: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache {operation} operation timed out after {}ms", after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Cache not available")]
    Unavailable,

    #[error("Invalid key pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Cache configuration error: {message}")]
    Configuration { message: String },

    /// Wraps any failure of an operation whose caller expects feedback
    #[error("{message}: {source}")]
    OperationFailed {
        message: String,
        #[source]
        source: Box<CacheError>,
    },
}

impl CacheError {
    pub fn backend<S: Into<String>>(message: S) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Timeouts and connectivity problems; the request can proceed without the cache
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Unavailable => true,
            Self::Redis(err) => {
                err.is_timeout()
                    || err.is_io_error()
                    || err.is_connection_refusal()
                    || err.is_connection_dropped()
            }
            Self::Backend { message } => {
                let message = message.to_ascii_lowercase();
                message.contains("timed out")
                    || message.contains("connection")
                    || message.contains("refused")
            }
            Self::OperationFailed { source, .. } => source.is_transient(),
            Self::Serialization(_) | Self::InvalidPattern { .. } | Self::Configuration { .. } => false,
        }
    }
}

/// Run a store operation with a hard deadline.
///
/// The operation future is dropped when the deadline passes; anything it
/// already sent to the backend may still complete there, its outcome is ignored.
pub async fn bounded<T, F>(operation: &'static str, limit: Duration, future: F) -> CacheResult<T>
where
    F: Future<Output = CacheResult<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::Timeout {
            operation,
            after: limit,
        }),
    }
}
