//! # Caching Integration Tests
//!
//! End-to-end behaviour of the response cache layer in front of real axum
//! routes: hits, misses, write-through, bypass on an unavailable backend,
//! bounded reads and invalidation.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tabu_gateway::caching::middleware::CACHE_STATUS_HEADER;
use tabu_gateway::caching::{
    build_key, CacheError, CachePolicy, CacheResult, CacheStore, KeyNamespace, MemoryStore, ResponseCache,
};
use tokio::sync::Barrier;
use tokio::time::Instant;
use tower::ServiceExt;

/// Store double whose operations never complete, with switchable connectivity.
/// With `reads_miss` set, reads answer "not found" at once and only writes hang.
#[derive(Default)]
struct HangingStore {
    offline: AtomicBool,
    reads_miss: AtomicBool,
    gets: AtomicUsize,
    sets: AtomicUsize,
}

#[async_trait]
impl CacheStore for HangingStore {
    fn is_connected(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    fn is_ready(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.reads_miss.load(Ordering::SeqCst) {
            return Ok(None);
        }
        std::future::pending().await
    }

    async fn set_with_ttl(&self, _key: &str, _ttl_seconds: u64, _value: &str) -> CacheResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn find_keys(&self, _pattern: &str) -> CacheResult<Vec<String>> {
        std::future::pending().await
    }

    async fn delete_keys(&self, _keys: &[String]) -> CacheResult<u64> {
        Ok(0)
    }

    async fn info(&self) -> CacheResult<String> {
        Ok(String::new())
    }

    async fn key_count(&self) -> CacheResult<u64> {
        Ok(0)
    }
}

/// Store double whose writes fail with a non-transient error.
/// With `reject_reads` set, reads fail with a backend error reply as well.
struct RejectingStore {
    inner: MemoryStore,
    reject_reads: bool,
}

impl RejectingStore {
    fn writes() -> Self {
        Self {
            inner: MemoryStore::new(),
            reject_reads: false,
        }
    }

    fn reads_and_writes() -> Self {
        Self {
            inner: MemoryStore::new(),
            reject_reads: true,
        }
    }
}

#[async_trait]
impl CacheStore for RejectingStore {
    fn is_connected(&self) -> bool {
        true
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        if self.reject_reads {
            return Err(CacheError::backend(
                "WRONGTYPE Operation against a key holding the wrong kind of value",
            ));
        }
        self.inner.get(key).await
    }

    async fn set_with_ttl(&self, _key: &str, _ttl_seconds: u64, _value: &str) -> CacheResult<()> {
        Err(CacheError::backend("OOM command not allowed when used memory > 'maxmemory'"))
    }

    async fn find_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.inner.find_keys(pattern).await
    }

    async fn delete_keys(&self, keys: &[String]) -> CacheResult<u64> {
        self.inner.delete_keys(keys).await
    }

    async fn info(&self) -> CacheResult<String> {
        self.inner.info().await
    }

    async fn key_count(&self) -> CacheResult<u64> {
        self.inner.key_count().await
    }
}

/// Memory store that records every written value in write order
#[derive(Default)]
struct RecordingStore {
    inner: MemoryStore,
    written: Mutex<Vec<String>>,
}

#[async_trait]
impl CacheStore for RecordingStore {
    fn is_connected(&self) -> bool {
        true
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn set_with_ttl(&self, key: &str, ttl_seconds: u64, value: &str) -> CacheResult<()> {
        self.written.lock().unwrap().push(value.to_string());
        self.inner.set_with_ttl(key, ttl_seconds, value).await
    }

    async fn find_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.inner.find_keys(pattern).await
    }

    async fn delete_keys(&self, keys: &[String]) -> CacheResult<u64> {
        self.inner.delete_keys(keys).await
    }

    async fn info(&self) -> CacheResult<String> {
        self.inner.info().await
    }

    async fn key_count(&self) -> CacheResult<u64> {
        self.inner.key_count().await
    }
}

fn response_cache(store: Arc<dyn CacheStore>) -> ResponseCache {
    ResponseCache::new(store, KeyNamespace::none(), CachePolicy::default())
}

/// `GET /tables` behind the cache, counting handler invocations
fn tables_app(cache: &ResponseCache, calls: Arc<AtomicUsize>) -> Router {
    Router::new().route(
        "/tables",
        get(move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Json(json!({ "tables": ["a", "b"] }))
            }
        })
        .layer(cache.layer("tables", 3600)),
    )
}

/// `GET /user/:id` behind the cache, the body echoes the path and the call count
fn user_app(cache: &ResponseCache, calls: Arc<AtomicUsize>) -> Router {
    Router::new().route(
        "/user/:id",
        get(move |axum::extract::Path(id): axum::extract::Path<String>| {
            let calls = calls.clone();
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Json(json!({ "id": id, "call": call }))
            }
        })
        .layer(cache.layer("user", 60)),
    )
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
    let response = app.clone().oneshot(get_request(uri)).await.unwrap();
    let status = response.status();
    let cache_status = response
        .headers()
        .get(CACHE_STATUS_HEADER)
        .map(|value| value.to_str().unwrap().to_string());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    (status, cache_status, body)
}

#[tokio::test]
async fn test_tables_route_miss_then_hit() {
    let store = Arc::new(MemoryStore::new());
    let cache = response_cache(store.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let app = tables_app(&cache, calls.clone());

    let (status, cache_status, first) = send(&app, "/tables").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_status.as_deref(), Some("MISS"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    cache.flush_writes().await;
    let stored = store.get("tables::tables").await.unwrap();
    assert_eq!(stored.as_deref(), Some(r#"{"tables":["a","b"]}"#));

    let (status, cache_status, second) = send(&app, "/tables").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_status.as_deref(), Some("HIT"));
    assert_eq!(calls.load(Ordering::SeqCst), 1, "a hit must not run the handler");
    assert_eq!(first, second, "a hit must return the stored bytes unchanged");
}

#[tokio::test]
async fn test_hits_do_not_call_handler() {
    let store = Arc::new(MemoryStore::new());
    let cache = response_cache(store);
    let calls = Arc::new(AtomicUsize::new(0));
    let app = user_app(&cache, calls.clone());

    send(&app, "/user/7").await;
    cache.flush_writes().await;

    for _ in 0..5 {
        let (_, cache_status, body) = send(&app, "/user/7").await;
        assert_eq!(cache_status.as_deref(), Some("HIT"));
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["call"], 1);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_query_string_is_part_of_the_key() {
    let store = Arc::new(MemoryStore::new());
    let cache = response_cache(store.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let app = user_app(&cache, calls.clone());

    send(&app, "/user/1?limit=10").await;
    cache.flush_writes().await;
    send(&app, "/user/1?limit=20").await;
    cache.flush_writes().await;
    send(&app, "/user/1?limit=10").await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.len(), 2);
    assert!(store
        .get(&build_key("user", "/user/1?limit=20"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_backend_adds_no_latency() {
    let store = Arc::new(HangingStore::default());
    store.offline.store(true, Ordering::SeqCst);
    let cache = response_cache(store.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let app = tables_app(&cache, calls.clone());

    let started = Instant::now();
    let (status, cache_status, _) = send(&app, "/tables").await;
    assert_eq!(started.elapsed(), Duration::ZERO);

    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_status, None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.gets.load(Ordering::SeqCst), 0, "no read may be attempted");
    assert_eq!(store.sets.load(Ordering::SeqCst), 0);
    assert_eq!(cache.pending_writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_read_falls_through_once() {
    let store = Arc::new(HangingStore::default());
    let cache = response_cache(store.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let app = tables_app(&cache, calls.clone());

    let started = Instant::now();
    let (status, _, body) = send(&app, "/tables").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(started.elapsed(), Duration::from_millis(1000));
    assert_eq!(calls.load(Ordering::SeqCst), 1, "handler must run exactly once");
    assert_eq!(store.gets.load(Ordering::SeqCst), 1);
    assert_eq!(body, br#"{"tables":["a","b"]}"#.to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_read_timeout_skips_write() {
    let store = Arc::new(HangingStore::default());
    let policy = CachePolicy {
        read_timeout: Duration::from_millis(50),
        ..CachePolicy::default()
    };
    let cache = ResponseCache::new(store.clone(), KeyNamespace::none(), policy);
    let calls = Arc::new(AtomicUsize::new(0));
    let app = tables_app(&cache, calls.clone());

    let started = Instant::now();
    let (status, cache_status, _) = send(&app, "/tables").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started.elapsed(), Duration::from_millis(50));
    assert_eq!(cache_status, None);

    cache.flush_writes().await;
    assert_eq!(store.sets.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_write_is_bounded() {
    let store = Arc::new(HangingStore::default());
    store.reads_miss.store(true, Ordering::SeqCst);
    let policy = CachePolicy {
        write_timeout: Duration::from_millis(200),
        ..CachePolicy::default()
    };
    let cache = ResponseCache::new(store.clone(), KeyNamespace::none(), policy);
    let calls = Arc::new(AtomicUsize::new(0));
    let app = tables_app(&cache, calls.clone());

    let started = Instant::now();
    let (status, cache_status, _) = send(&app, "/tables").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_status.as_deref(), Some("MISS"));
    assert_eq!(started.elapsed(), Duration::ZERO, "the write must not delay the response");

    cache.flush_writes().await;
    assert_eq!(started.elapsed(), Duration::from_millis(200));
    assert_eq!(store.sets.load(Ordering::SeqCst), 1);
    assert_eq!(cache.pending_writes(), 0);
}

#[tokio::test]
async fn test_write_failure_does_not_affect_response() {
    let store = Arc::new(RejectingStore::writes());
    let cache = response_cache(store);
    let calls = Arc::new(AtomicUsize::new(0));
    let app = tables_app(&cache, calls.clone());

    let (status, cache_status, body) = send(&app, "/tables").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_status.as_deref(), Some("MISS"));
    assert_eq!(body, br#"{"tables":["a","b"]}"#.to_vec());

    cache.flush_writes().await;
    let (_, cache_status, _) = send(&app, "/tables").await;
    assert_eq!(cache_status.as_deref(), Some("MISS"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_backend_read_error_falls_through() {
    let store = Arc::new(RejectingStore::reads_and_writes());
    let cache = response_cache(store);
    let calls = Arc::new(AtomicUsize::new(0));
    let app = tables_app(&cache, calls.clone());

    let (status, _, body) = send(&app, "/tables").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(body, br#"{"tables":["a","b"]}"#.to_vec());
    assert!(!String::from_utf8_lossy(&body).contains("WRONGTYPE"));
}

#[tokio::test]
async fn test_concurrent_misses_both_run_and_last_write_wins() {
    let store = Arc::new(RecordingStore::default());
    let cache = response_cache(store.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(2));

    let handler_calls = calls.clone();
    let app = Router::new().route(
        "/user/:id",
        get(move || {
            let calls = handler_calls.clone();
            let barrier = barrier.clone();
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                // Both requests are inside the handler before either responds
                barrier.wait().await;
                Json(json!({ "call": call }))
            }
        })
        .layer(cache.layer("user", 60)),
    );

    let (first, second) = tokio::join!(send(&app, "/user/1"), send(&app, "/user/1"));
    assert_eq!(first.1.as_deref(), Some("MISS"));
    assert_eq!(second.1.as_deref(), Some("MISS"));
    assert_ne!(first.2, second.2);

    cache.flush_writes().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let written = store.written.lock().unwrap().clone();
    assert_eq!(written.len(), 2);
    let stored = store.get("user::user:1").await.unwrap();
    assert_eq!(stored.as_deref(), written.last().map(String::as_str));
}

#[tokio::test]
async fn test_clear_forces_miss() {
    let store = Arc::new(MemoryStore::new());
    let cache = response_cache(store.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let app = user_app(&cache, calls.clone());

    send(&app, "/user/1").await;
    send(&app, "/user/2").await;
    cache.flush_writes().await;
    assert_eq!(store.len(), 2);

    let invalidator = cache.invalidator(Duration::from_secs(2));
    assert_eq!(invalidator.clear("user:*").await.unwrap(), 2);
    assert!(store.is_empty());

    let (_, cache_status, _) = send(&app, "/user/1").await;
    assert_eq!(cache_status.as_deref(), Some("MISS"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_clear_on_unavailable_store_is_noop() {
    let store = Arc::new(MemoryStore::offline());
    let cache = response_cache(store);

    let invalidator = cache.invalidator(Duration::from_secs(2));
    assert_eq!(invalidator.clear("user:*").await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_clear_timeout_is_reported() {
    let store = Arc::new(HangingStore::default());
    let cache = response_cache(store);

    let invalidator = cache.invalidator(Duration::from_millis(2000));
    let started = Instant::now();
    let result = invalidator.clear("user:*").await;

    assert_eq!(started.elapsed(), Duration::from_millis(2000));
    match result {
        Err(CacheError::OperationFailed { message, source }) => {
            assert_eq!(message, "Failed to clear cache");
            assert!(matches!(*source, CacheError::Timeout { operation: "keys", .. }));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_namespaced_keys_and_patterns_agree() {
    let store = Arc::new(MemoryStore::new());
    let cache = ResponseCache::new(store.clone(), KeyNamespace::new("tabu"), CachePolicy::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let app = tables_app(&cache, calls.clone());

    send(&app, "/tables").await;
    cache.flush_writes().await;
    assert!(store.get("tabu:tables::tables").await.unwrap().is_some());

    let invalidator = cache.invalidator(Duration::from_secs(2));
    assert_eq!(invalidator.clear("tables:*").await.unwrap(), 1);
    assert!(store.is_empty());
}
