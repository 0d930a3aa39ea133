//! # Cache Middleware
//!
//! Cache-aside layer for JSON endpoints.
//!
//! ## Request flow
//! 1. In test mode the availability prober is consulted before anything else.
//! 2. The key is built from the route prefix and the original path and query.
//! 3. Availability is checked again; an unavailable store means bypass.
//! 4. The stored value is read with a deadline. Hits are answered directly
//!    and the wrapped handler is not called.
//! 5. On a miss the handler runs, its JSON body is captured and returned to the
//!    client, and a background task writes it to the store with its own deadline.
//!
//! Any read failure (timeout, lost connection, backend error reply) falls
//! through to the handler. Only a stored value that is not valid JSON becomes a
//! `500` error envelope. Write failures are only logged.
//!
//! There is no single-flight: concurrent misses for one key all run the handler
//! and all write, the last write wins.

use super::{
    bounded, build_key, AvailabilityProber, CacheError, CacheStore, Invalidator, KeyNamespace,
};
use crate::core::config::CacheConfig;
use crate::core::error::ApiError;
use axum::body::{Body, HttpBody};
use axum::extract::{OriginalUri, Request};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::de::IgnoredAny;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tower::{Layer, Service};
use tracing::{debug, error, warn};

/// Response header telling whether the body came from the cache
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Deadlines and limits of the cache layer
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub probe_timeout: Duration,

    /// Probe the store before building the key
    pub test_mode: bool,

    /// Larger bodies are served but not cached
    pub max_body_bytes: usize,

    /// TTL in seconds used by [`ResponseCache::layer_default`]
    pub default_ttl: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(1000),
            write_timeout: Duration::from_millis(1000),
            probe_timeout: Duration::from_millis(1000),
            test_mode: false,
            max_body_bytes: 8 * 1024 * 1024,
            default_ttl: 3600,
        }
    }
}

impl CachePolicy {
    pub fn from_config(config: &CacheConfig, test_mode: bool) -> Self {
        Self {
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            probe_timeout: config.probe_timeout,
            test_mode,
            max_body_bytes: config.max_body_bytes,
            default_ttl: config.default_ttl,
        }
    }
}

struct Inner {
    store: Arc<dyn CacheStore>,
    prober: AvailabilityProber,
    namespace: KeyNamespace,
    policy: CachePolicy,
    writes: TaskTracker,
}

/// Shared handle of the response cache; cheap to clone.
///
/// Produces per-route [`CacheLayer`]s and tracks the background writes they spawn.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<Inner>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, namespace: KeyNamespace, policy: CachePolicy) -> Self {
        let prober = AvailabilityProber::new(store.clone(), policy.probe_timeout);
        Self {
            inner: Arc::new(Inner {
                store,
                prober,
                namespace,
                policy,
                writes: TaskTracker::new(),
            }),
        }
    }

    /// Layer caching the wrapped route under `prefix` for `ttl_seconds`
    pub fn layer(&self, prefix: impl Into<String>, ttl_seconds: u64) -> CacheLayer {
        CacheLayer {
            cache: self.clone(),
            prefix: Arc::from(prefix.into()),
            ttl_seconds,
        }
    }

    pub fn layer_default(&self, prefix: impl Into<String>) -> CacheLayer {
        self.layer(prefix, self.inner.policy.default_ttl)
    }

    pub fn prober(&self) -> &AvailabilityProber {
        &self.inner.prober
    }

    pub fn store(&self) -> Arc<dyn CacheStore> {
        self.inner.store.clone()
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.inner.namespace
    }

    /// Invalidation helper sharing this cache's store and namespace
    pub fn invalidator(&self, timeout: Duration) -> Invalidator {
        Invalidator::new(
            self.inner.store.clone(),
            self.inner.prober.clone(),
            self.inner.namespace.clone(),
            timeout,
        )
    }

    /// Wait until every background write spawned so far has finished
    pub async fn flush_writes(&self) {
        let writes = &self.inner.writes;
        writes.close();
        writes.wait().await;
        writes.reopen();
    }

    /// Number of background writes still running
    pub fn pending_writes(&self) -> usize {
        self.inner.writes.len()
    }

    fn key_for(&self, prefix: &str, request: &Request) -> String {
        let uri = request
            .extensions()
            .get::<OriginalUri>()
            .map(|original| &original.0)
            .unwrap_or_else(|| request.uri());
        let full_path = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());

        self.inner.namespace.qualify(&build_key(prefix, full_path))
    }

    async fn read(&self, key: &str) -> ReadOutcome {
        if self.inner.policy.test_mode && !self.inner.prober.is_available().await {
            debug!("Cache unavailable in test mode, bypassing {}", key);
            return ReadOutcome::Bypass;
        }

        if !self.inner.prober.is_available().await {
            warn!("Redis not available, skipping cache for {}", key);
            return ReadOutcome::Bypass;
        }

        let result = bounded("get", self.inner.policy.read_timeout, self.inner.store.get(key)).await;
        match result {
            Ok(Some(value)) => match serde_json::from_str::<IgnoredAny>(&value) {
                Ok(_) => ReadOutcome::Hit(value),
                Err(e) => ReadOutcome::Failed(CacheError::Serialization(e)),
            },
            Ok(None) => ReadOutcome::Miss,
            Err(e) if e.is_transient() => {
                warn!("Cache read failed for {}, continuing without cache: {}", key, e);
                ReadOutcome::Bypass
            }
            Err(e) => {
                error!("Cache read error for {}, continuing without cache: {}", key, e);
                ReadOutcome::Bypass
            }
        }
    }

    fn spawn_write(&self, key: String, ttl_seconds: u64, payload: String) {
        let cache = self.clone();
        self.inner.writes.spawn(async move {
            if !cache.inner.prober.is_available().await {
                debug!("Redis not available, skipping cache write for {}", key);
                return;
            }

            let store = &cache.inner.store;
            let write = store.set_with_ttl(&key, ttl_seconds, &payload);
            match bounded("set", cache.inner.policy.write_timeout, write).await {
                Ok(()) => debug!("Cached response for {} ({}s)", key, ttl_seconds),
                Err(e) => error!("Cache write failed for {}: {}", key, e),
            }
        });
    }

    /// Buffer a cacheable response, returning the rebuilt response and the payload to store
    async fn capture(&self, response: Response) -> (Response, Option<String>) {
        if !is_cacheable(&response) {
            return (response, None);
        }

        match response.body().size_hint().upper() {
            Some(upper) if upper <= self.inner.policy.max_body_bytes as u64 => {}
            _ => return (response, None),
        }

        let (parts, body) = response.into_parts();
        let bytes = match axum::body::to_bytes(body, self.inner.policy.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = ApiError::internal(format!("Failed to read response body: {}", e));
                return (err.into_response(), None);
            }
        };

        let payload = std::str::from_utf8(&bytes).ok().map(str::to_owned);
        (Response::from_parts(parts, Body::from(bytes)), payload)
    }
}

enum ReadOutcome {
    Hit(String),
    Miss,
    Bypass,
    Failed(CacheError),
}

fn is_cacheable(response: &Response) -> bool {
    response.status().is_success()
        && response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.starts_with("application/json"))
            .unwrap_or(false)
}

fn hit_response(body: String) -> Response {
    let mut response = (StatusCode::OK, Body::from(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));
    response
}

/// Tower layer produced by [`ResponseCache::layer`]
#[derive(Clone)]
pub struct CacheLayer {
    cache: ResponseCache,
    prefix: Arc<str>,
    ttl_seconds: u64,
}

impl<S> Layer<S> for CacheLayer {
    type Service = CacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheService {
            inner,
            cache: self.cache.clone(),
            prefix: self.prefix.clone(),
            ttl_seconds: self.ttl_seconds,
        }
    }
}

#[derive(Clone)]
pub struct CacheService<S> {
    inner: S,
    cache: ResponseCache,
    prefix: Arc<str>,
    ttl_seconds: u64,
}

impl<S> Service<Request> for CacheService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let cache = self.cache.clone();
        let prefix = self.prefix.clone();
        let ttl_seconds = self.ttl_seconds;

        // The clone that was driven to readiness handles this request
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let key = cache.key_for(&prefix, &request);

            match cache.read(&key).await {
                ReadOutcome::Hit(body) => {
                    debug!("Cache hit for {}", key);
                    return Ok(hit_response(body));
                }
                ReadOutcome::Bypass => return inner.call(request).await,
                ReadOutcome::Failed(e) => {
                    error!("Cache middleware error for {}: {}", key, e);
                    return Ok(ApiError::from(e).into_response());
                }
                ReadOutcome::Miss => debug!("Cache miss for {}", key),
            }

            let response = inner.call(request).await?;
            let (mut response, payload) = cache.capture(response).await;

            if let Some(payload) = payload {
                response
                    .headers_mut()
                    .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));
                cache.spawn_write(key, ttl_seconds, payload);
            }

            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::MemoryStore;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn app(cache: &ResponseCache, calls: Arc<AtomicUsize>) -> Router {
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

    async fn send(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let store = Arc::new(MemoryStore::new());
        let cache = ResponseCache::new(store.clone(), KeyNamespace::none(), CachePolicy::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(&cache, calls.clone());

        let first = send(&app, "/tables").await;
        assert_eq!(first.headers()[CACHE_STATUS_HEADER], "MISS");
        cache.flush_writes().await;
        assert!(store.get("tables::tables").await.unwrap().is_some());

        let second = send(&app, "/tables").await;
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(second.headers()[CACHE_STATUS_HEADER], "HIT");
        assert_eq!(second.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_namespace_applies_to_keys() {
        let store = Arc::new(MemoryStore::new());
        let cache = ResponseCache::new(store.clone(), KeyNamespace::new("tabu"), CachePolicy::default());
        let app = app(&cache, Arc::new(AtomicUsize::new(0)));

        send(&app, "/tables?limit=5").await;
        cache.flush_writes().await;
        assert!(store.get("tabu:tables::tables?limit=5").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_error_responses_are_not_cached() {
        let store = Arc::new(MemoryStore::new());
        let cache = ResponseCache::new(store.clone(), KeyNamespace::none(), CachePolicy::default());
        let app = Router::new().route(
            "/missing",
            get(|| async { ApiError::not_found("nothing here") }).layer(cache.layer("records", 60)),
        );

        let response = send(&app, "/missing").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(CACHE_STATUS_HEADER).is_none());
        cache.flush_writes().await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_bodies_are_not_cached() {
        let store = Arc::new(MemoryStore::new());
        let policy = CachePolicy {
            max_body_bytes: 8,
            ..Default::default()
        };
        let cache = ResponseCache::new(store.clone(), KeyNamespace::none(), policy);
        let app = app(&cache, Arc::new(AtomicUsize::new(0)));

        let response = send(&app, "/tables").await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], br#"{"tables":["a","b"]}"#);
        cache.flush_writes().await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_server_error() {
        let store = Arc::new(MemoryStore::new());
        store.set_with_ttl("tables::tables", 60, "{not json").await.unwrap();
        let cache = ResponseCache::new(store, KeyNamespace::none(), CachePolicy::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(&cache, calls.clone());

        let response = send(&app, "/tables").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_offline_store_bypasses() {
        let cache = ResponseCache::new(
            Arc::new(MemoryStore::offline()),
            KeyNamespace::none(),
            CachePolicy {
                test_mode: true,
                ..Default::default()
            },
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(&cache, calls.clone());

        for _ in 0..2 {
            let response = send(&app, "/tables").await;
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(CACHE_STATUS_HEADER).is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.pending_writes(), 0);
    }
}
