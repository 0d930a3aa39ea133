//! Cache statistics for the system endpoints.

use super::{CacheResult, CacheStore};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

/// Snapshot of the cache backend
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_keys: u64,

    /// Hit rate in percent, rounded to two decimals
    pub hit_rate: f64,

    /// Human readable memory usage as reported by the backend
    pub memory_usage: String,

    /// Backend uptime in hours, rounded to two decimals
    pub uptime: f64,
}

#[derive(Clone)]
pub struct CacheMonitor {
    store: Arc<dyn CacheStore>,
}

impl CacheMonitor {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Collect statistics; `None` when the backend cannot be queried
    pub async fn stats(&self) -> Option<CacheStats> {
        match self.collect().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!("Failed to get cache stats: {}", e);
                None
            }
        }
    }

    async fn collect(&self) -> CacheResult<CacheStats> {
        let info = self.store.info().await?;
        let total_keys = self.store.key_count().await?;
        Ok(stats_from_info(&info, total_keys))
    }
}

fn stats_from_info(info: &str, total_keys: u64) -> CacheStats {
    let fields = parse_info(info);
    let number = |name: &str| {
        fields
            .get(name)
            .and_then(|value| value.parse::<f64>().ok())
            .unwrap_or(0.0)
    };

    let hits = number("keyspace_hits");
    let misses = number("keyspace_misses");
    let hit_rate = if hits + misses > 0.0 {
        round2(hits / (hits + misses) * 100.0)
    } else {
        0.0
    };

    CacheStats {
        total_keys,
        hit_rate,
        memory_usage: fields
            .get("used_memory_human")
            .map(|value| value.to_string())
            .unwrap_or_else(|| "0B".to_string()),
        uptime: round2(number("uptime_in_seconds") / 3600.0),
    }
}

/// `name:value` lines of an INFO reply; section headers and blanks are skipped
fn parse_info(info: &str) -> HashMap<&str, &str> {
    info.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
