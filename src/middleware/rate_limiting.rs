//! # Rate Limiting
//!
//! Fixed-window request limiting per client address. Each client gets `max`
//! requests per `window`; the counter resets when the window that started with
//! the client's first request has passed.
//!
//! The client address is the peer address when the server was started with
//! connect info, otherwise the first `X-Forwarded-For` entry.
//!
//! Rejected requests get `429` with the error envelope used by the rest of the API:
//! ```json
//! { "success": false, "statusCode": 429, "type": "TOO_MANY_REQUESTS", "message": "..." }
//! ```

use crate::core::config::RateLimitingConfig;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const LIMIT_HEADER: HeaderName = HeaderName::from_static("ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Outcome of one rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

#[derive(Debug, Default)]
pub struct RateLimitMetrics {
    pub requests_allowed: AtomicU64,
    pub requests_denied: AtomicU64,
}

pub struct RateLimiter {
    max: u32,
    window: Duration,
    message: String,
    windows: DashMap<String, Window>,
    metrics: RateLimitMetrics,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration, message: impl Into<String>) -> Self {
        Self {
            max,
            window,
            message: message.into(),
            windows: DashMap::new(),
            metrics: RateLimitMetrics::default(),
        }
    }

    pub fn from_config(config: &RateLimitingConfig) -> Self {
        Self::new(config.max, config.window, config.message.clone())
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn metrics(&self) -> &RateLimitMetrics {
        &self.metrics
    }

    /// Count one request for `client`
    pub fn check(&self, client: &str) -> RateLimitResult {
        let now = Instant::now();
        let mut entry = self.windows.entry(client.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });

        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                count: 0,
                started: now,
            };
        }

        let allowed = entry.count < self.max;
        if allowed {
            entry.count += 1;
            self.metrics.requests_allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.requests_denied.fetch_add(1, Ordering::Relaxed);
        }

        RateLimitResult {
            allowed,
            limit: self.max,
            remaining: self.max.saturating_sub(entry.count),
            reset_after: self.window.saturating_sub(now.duration_since(entry.started)),
        }
    }

    /// Drop windows that have already ended
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.windows
            .retain(|_, window| now.duration_since(window.started) < self.window);
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

/// Address used as the rate limit key
pub fn client_key(request: &Request) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    forwarded_for(request.headers()).unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_key(&request);
    let result = limiter.check(&client);

    let mut response = if result.allowed {
        debug!(client = %client, remaining = result.remaining, "Rate limit check passed");
        next.run(request).await
    } else {
        warn!(client = %client, "Rate limit exceeded");
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "success": false,
                "statusCode": 429,
                "type": "TOO_MANY_REQUESTS",
                "message": limiter.message(),
            })),
        )
            .into_response()
    };

    let headers = response.headers_mut();
    headers.insert(LIMIT_HEADER, HeaderValue::from(result.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(result.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(result.reset_after.as_secs()));
    response
}
