//! Cache backend availability probing.

use super::{bounded, CacheStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Reports whether the cache backend can be used for the current operation.
///
/// The answer is recomputed on every call: both connectivity flags of the
/// store must be set and a ping must succeed within `probe_timeout`.
#[derive(Clone)]
pub struct AvailabilityProber {
    store: Arc<dyn CacheStore>,
    probe_timeout: Duration,
}

impl AvailabilityProber {
    pub fn new(store: Arc<dyn CacheStore>, probe_timeout: Duration) -> Self {
        Self { store, probe_timeout }
    }

    /// Never fails; every problem degrades to `false`.
    pub async fn is_available(&self) -> bool {
        if !self.store.is_connected() || !self.store.is_ready() {
            debug!("Redis client not ready or not connected");
            return false;
        }

        match bounded("ping", self.probe_timeout, self.store.ping()).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Redis availability check failed: {}", e);
                false
            }
        }
    }
}
