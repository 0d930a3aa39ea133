//! # Authentication Middleware
//!
//! Bearer-token guard for routes that change server state. Used with
//! `axum::middleware::from_fn_with_state`:
//!
//! ```rust,ignore
//! let admin = Router::new()
//!     .route("/system/cache", delete(clear_cache))
//!     .route_layer(from_fn_with_state(authenticator.clone(), require_bearer));
//! ```
//!
//! On success the verified [`AuthenticatedUser`] is stored in the request
//! extensions. Failures answer `401 {"success": false, "message": ...}`.

use super::{Claims, JwtAuthenticator};
use crate::core::error::ApiError;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

const BEARER_PREFIX: &str = "Bearer ";

/// The caller of an authenticated request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub claims: Claims,

    /// The raw token, needed for revocation
    pub token: String,
}

/// Token from `Authorization: Bearer <token>`
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub async fn require_bearer(
    State(authenticator): State<Arc<JwtAuthenticator>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match extract_token(request.headers()) {
        Some(token) => token.to_string(),
        None => return unauthorized("Authorization header missing or invalid"),
    };

    match authenticator.verify(&token) {
        Ok(claims) => {
            request.extensions_mut().insert(AuthenticatedUser { claims, token });
            next.run(request).await
        }
        Err(ApiError::Authentication { reason }) => unauthorized(&reason),
        Err(other) => other.into_response(),
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "success": false, "message": message })),
    )
        .into_response()
}
