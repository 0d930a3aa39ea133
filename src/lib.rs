//! # Tabu Gateway - Core Library Crate
//!
//! Read-only REST gateway over an analytical warehouse. Slow warehouse reads
//! are fronted by a cache-aside response layer that must never make a request
//! slower or fail it because the cache misbehaves.
//!
//! ## Module Layout
//! - `core`: configuration and the HTTP-boundary error type
//! - `caching`: cache stores, availability probing, key building, the response
//!   cache layer, invalidation and statistics
//! - `warehouse`: the BigQuery REST client and the typed lookups built on it
//! - `auth`: JWT issuing, verification, revocation and the bearer guard
//! - `middleware`: rate limiting, security headers, CORS and request tracing
//! - `api`: routes, handlers and shared state
//! - `observability`: logging setup

/// Configuration and error types used throughout the gateway
pub mod core;

/// Cache-aside response caching
/// Backends are pluggable through the `CacheStore` trait: Redis or in-memory
pub mod caching;

/// Warehouse access
pub mod warehouse;

/// Token-based authentication for state-changing routes
pub mod auth;

/// Cross-cutting HTTP layers
pub mod middleware;

/// HTTP routes and handlers
pub mod api;

/// Structured logging
pub mod observability;

/// Main error type at the HTTP boundary
pub use core::error::{ApiError, ApiResult};

/// Application configuration
pub use core::config::AppConfig;

/// Router construction and shared handler state
pub use api::{build_store, router, AppState};

/// Response cache entry points
pub use caching::{CacheStore, ResponseCache};
