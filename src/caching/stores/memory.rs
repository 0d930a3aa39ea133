//! # In-Memory Cache Store
//!
//! A process-local [`CacheStore`] used when no Redis is deployed and in tests.
//! Keys expire lazily on access. Connectivity can be switched off to simulate
//! an outage of the backend.

use super::CacheStore;
use crate::caching::{CacheError, CacheResult};
use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory cache store
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,

    connected: AtomicBool,
    ready: AtomicBool,

    hits: AtomicU64,
    misses: AtomicU64,

    started_at: Instant,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a connected, ready, empty store
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            connected: AtomicBool::new(true),
            ready: AtomicBool::new(true),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// A store that reports itself as down; every cached route bypasses it
    pub fn offline() -> Self {
        let store = Self::new();
        store.set_connected(false);
        store.set_ready(false);
        store
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.purge_expired();
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_connected(&self) -> CacheResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::backend("Connection is closed"))
        }
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    fn used_memory(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.key().len() + entry.value().value.len())
            .sum()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> CacheResult<()> {
        self.ensure_connected()
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.ensure_connected()?;

        let now = Instant::now();
        let lookup = self.entries.get(key).map(|entry| entry.clone());
        let value = match lookup {
            Some(entry) if !entry.is_expired(now) => Some(entry.value),
            Some(_) => {
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                None
            }
            None => None,
        };

        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, ttl_seconds: u64, value: &str) -> CacheResult<()> {
        self.ensure_connected()?;

        if ttl_seconds == 0 {
            return Err(CacheError::backend("invalid expire time in 'setex' command"));
        }

        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
            },
        );
        debug!(key, ttl_seconds, "Stored in-memory cache entry");
        Ok(())
    }

    async fn find_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.ensure_connected()?;

        let matcher = glob_to_regex(pattern)?;
        self.purge_expired();

        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| matcher.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_keys(&self, keys: &[String]) -> CacheResult<u64> {
        self.ensure_connected()?;

        let now = Instant::now();
        let deleted = keys
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|(_, entry)| !entry.is_expired(now))
            .count();
        Ok(deleted as u64)
    }

    async fn info(&self) -> CacheResult<String> {
        self.ensure_connected()?;
        self.purge_expired();

        let used_memory = self.used_memory();
        Ok(format!(
            "# Server\r\nuptime_in_seconds:{}\r\n\r\n# Memory\r\nused_memory:{}\r\nused_memory_human:{}\r\n\r\n# Stats\r\nkeyspace_hits:{}\r\nkeyspace_misses:{}\r\n",
            self.started_at.elapsed().as_secs(),
            used_memory,
            human_bytes(used_memory),
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        ))
    }

    async fn key_count(&self) -> CacheResult<u64> {
        self.ensure_connected()?;
        Ok(self.len() as u64)
    }
}

/// Translate a Redis glob (`*`, `?`, `[...]`, `\` escapes) into an anchored regex
pub(crate) fn glob_to_regex(pattern: &str) -> CacheResult<Regex> {
    let mut regex = String::with_capacity(pattern.len() * 2 + 2);
    regex.push('^');

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => regex.push_str(&regex::escape(&escaped.to_string())),
                None => regex.push_str(&regex::escape("\\")),
            },
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                while let Some(inner) = chars.next() {
                    match inner {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                class.push('\\');
                                class.push(escaped);
                            }
                        }
                        '^' if class.is_empty() => class.push('^'),
                        '-' => class.push('-'),
                        other => class.push_str(&regex::escape(&other.to_string())),
                    }
                }
                if closed {
                    regex.push('[');
                    regex.push_str(&class);
                    regex.push(']');
                } else {
                    regex.push_str(&regex::escape("["));
                    regex.push_str(&regex::escape(&class));
                }
            }
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }

    regex.push('$');
    Regex::new(&regex).map_err(|e| CacheError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Format a byte count the way Redis renders `used_memory_human`
pub(crate) fn human_bytes(bytes: usize) -> String {
    const UNITS: [(&str, f64); 3] = [("G", 1024.0 * 1024.0 * 1024.0), ("M", 1024.0 * 1024.0), ("K", 1024.0)];

    let bytes_f = bytes as f64;
    for (suffix, size) in UNITS {
        if bytes_f >= size {
            return format!("{:.2}{}", bytes_f / size, suffix);
        }
    }
    format!("{}B", bytes)
}
