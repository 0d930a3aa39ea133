//! # HTTP API
//!
//! Routes, shared handler state and the middleware stack.
//!
//! ## Layer order (outermost first)
//! 1. Request tracing (when `server.log_requests` is set)
//! 2. CORS
//! 3. Security headers
//! 4. Rate limiting (when enabled)
//! 5. Per-route: response cache on `GET /tables` and `GET /:table_name`,
//!    bearer authentication on the state-changing routes

pub mod auth;
pub mod dto;
pub mod records;
pub mod system;
pub mod tables;
pub mod validation;

use crate::auth::{require_bearer, JwtAuthenticator};
use crate::caching::{
    CacheMonitor, CachePolicy, CacheResult, CacheStore, Invalidator, KeyNamespace, MemoryStore,
    RedisStore, RedisStoreConfig, ResponseCache,
};
use crate::core::config::{AppConfig, CacheBackendKind, CacheConfig};
use crate::core::error::ApiError;
use crate::middleware::{rate_limit, security_headers, trace_layer, CorsConfig, RateLimiter};
use crate::warehouse::{RecordRepository, Warehouse};
use axum::http::Uri;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub records: RecordRepository,
    pub cache: ResponseCache,
    pub invalidator: Invalidator,
    pub monitor: CacheMonitor,
    pub auth: Arc<JwtAuthenticator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, warehouse: Arc<dyn Warehouse>, store: Arc<dyn CacheStore>) -> Self {
        let config = Arc::new(config);

        let cache = ResponseCache::new(
            store.clone(),
            KeyNamespace::new(config.cache.namespace.clone()),
            CachePolicy::from_config(&config.cache, config.is_test_mode()),
        );
        let invalidator = cache.invalidator(config.cache.invalidation_timeout);

        Self {
            records: RecordRepository::new(warehouse, config.warehouse.schema.clone()),
            invalidator,
            monitor: CacheMonitor::new(store),
            cache,
            auth: Arc::new(JwtAuthenticator::from_config(&config.auth)),
            rate_limiter: Arc::new(RateLimiter::from_config(&config.rate_limiting)),
            started_at: Instant::now(),
            config,
        }
    }
}

/// Cache backend selected by configuration.
///
/// A disabled cache is an always-offline store, so cached routes pass straight
/// through and invalidation is a no-op.
pub async fn build_store(config: &CacheConfig) -> CacheResult<Arc<dyn CacheStore>> {
    if !config.enabled {
        info!("Response cache disabled");
        return Ok(Arc::new(MemoryStore::offline()));
    }

    match config.backend {
        CacheBackendKind::Memory => {
            info!("Using in-process response cache");
            Ok(Arc::new(MemoryStore::new()))
        }
        CacheBackendKind::Redis => {
            let store = RedisStore::connect(RedisStoreConfig {
                url: config.redis_url.clone(),
                connection_timeout: config.connection_timeout,
                health_check_interval: config.health_check_interval,
            })
            .await?;
            Ok(store as Arc<dyn CacheStore>)
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let config = state.config.clone();
    let durations = &config.cache.durations;

    let protected = Router::new()
        .route("/system/cache", delete(system::clear_cache))
        .route("/auth/revoke", post(auth::revoke_token))
        .route_layer(from_fn_with_state(state.auth.clone(), require_bearer));

    let api = Router::new()
        .route("/health", get(system::health))
        .route(
            "/tables",
            get(tables::list_tables).layer(state.cache.layer("tables", durations.tables)),
        )
        .route(
            "/:table_name",
            get(tables::browse_table).layer(state.cache.layer("records", durations.records)),
        )
        .route("/salary/check", post(records::check_salary))
        .route("/submission/check", post(records::check_submission))
        .route("/additional_position/check", post(records::check_additional_position))
        .route("/list_tech/check", post(records::check_list_tech))
        .route("/data_amount/check", post(records::check_data_amount))
        .route("/data_amount/filter", post(records::filter_data_amount))
        .route("/user/check", post(records::check_user))
        .route("/system/cache-stats", get(system::cache_stats))
        .merge(protected)
        .with_state(state.clone());

    let mount = config.server.api_route.trim_end_matches('/');
    let mut app = if mount.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(mount, api)
    };
    app = app.fallback(route_not_found);

    if config.rate_limiting.enabled {
        app = app.layer(from_fn_with_state(state.rate_limiter.clone(), rate_limit));
    }

    app = app
        .layer(from_fn(security_headers))
        .layer(CorsConfig::default().layer());

    if config.server.log_requests {
        app = app.layer(trace_layer());
    }

    app
}

async fn route_not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("Route {} not found", uri.path()))
}
