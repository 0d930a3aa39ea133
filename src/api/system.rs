//! Health and cache administration endpoints.

use super::AppState;
use crate::core::error::{ApiError, ApiResult};
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let cache_available = state.cache.prober().is_available().await;

    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "environment": state.config.environment.as_str(),
        "uptime": state.started_at.elapsed().as_secs(),
        "pid": std::process::id(),
        "version": env!("CARGO_PKG_VERSION"),
        "cache": { "available": cache_available },
    }))
}

/// `GET /system/cache-stats`; `stats` is `null` while the cache is unavailable
pub async fn cache_stats(State(state): State<AppState>) -> Json<Value> {
    let stats = state.monitor.stats().await;

    Json(json!({
        "success": true,
        "response": {
            "message": "Cache statistics retrieved successfully",
            "stats": stats,
        },
        "action": "getCacheStats",
        "error": null,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ClearCacheParams {
    pub pattern: Option<String>,
}

/// `DELETE /system/cache?pattern=`
pub async fn clear_cache(
    State(state): State<AppState>,
    Query(params): Query<ClearCacheParams>,
) -> ApiResult<Json<Value>> {
    let pattern = params
        .pattern
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            ApiError::invalid_field("pattern", "pattern is required and must be a non-empty string")
        })?;

    let deleted = state.invalidator.clear(&pattern).await?;
    info!(pattern = %pattern, deleted, "Cache entries cleared");

    Ok(Json(json!({
        "success": true,
        "response": {
            "message": "Cache cleared successfully",
            "pattern": pattern,
            "deleted": deleted,
        },
        "action": "clearCache",
        "error": null,
    })))
}
