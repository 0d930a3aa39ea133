//! # Cache Invalidation
//!
//! Pattern-based bulk removal of cached responses. Unlike the read and write
//! paths of the middleware, failures here are reported to the caller.

use super::{bounded, AvailabilityProber, CacheError, CacheResult, CacheStore, KeyNamespace};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const FAILURE_MESSAGE: &str = "Failed to clear cache";

#[derive(Clone)]
pub struct Invalidator {
    store: Arc<dyn CacheStore>,
    prober: AvailabilityProber,
    namespace: KeyNamespace,
    timeout: Duration,
}

impl Invalidator {
    pub fn new(
        store: Arc<dyn CacheStore>,
        prober: AvailabilityProber,
        namespace: KeyNamespace,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            prober,
            namespace,
            timeout,
        }
    }

    /// Delete every key matching `{namespace}:{pattern}` and return how many were removed.
    ///
    /// An unavailable store is a no-op returning `0`. Lookup and delete each get
    /// their own deadline; a failure in either is returned as
    /// [`CacheError::OperationFailed`].
    pub async fn clear(&self, pattern: &str) -> CacheResult<u64> {
        if !self.prober.is_available().await {
            warn!("Redis not available, skipping invalidation of '{}'", pattern);
            return Ok(0);
        }

        let qualified = self.namespace.qualify(pattern);
        self.clear_qualified(&qualified).await.map_err(|source| {
            warn!("Cache invalidation of '{}' failed: {}", qualified, source);
            CacheError::OperationFailed {
                message: FAILURE_MESSAGE.to_string(),
                source: Box::new(source),
            }
        })
    }

    async fn clear_qualified(&self, pattern: &str) -> CacheResult<u64> {
        let keys = bounded("keys", self.timeout, self.store.find_keys(pattern)).await?;
        if keys.is_empty() {
            debug!("No cache keys match '{}'", pattern);
            return Ok(0);
        }

        let deleted = bounded("del", self.timeout, self.store.delete_keys(&keys)).await?;
        info!("Cleared {} cache keys matching '{}'", deleted, pattern);
        Ok(deleted)
    }
}
