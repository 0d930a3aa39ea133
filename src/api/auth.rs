use super::AppState;
use crate::auth::AuthenticatedUser;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::json;
use tracing::info;

/// `POST /auth/revoke`; revokes the token that authenticated the request
pub async fn revoke_token(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Response {
    match state.auth.revoke(&user.token) {
        Ok(()) => {
            info!(user_id = %user.claims.user_id, "Token revoked");
            Json(json!({ "success": true, "message": "Token successfully revoked" })).into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": e.to_string() })),
        )
            .into_response(),
    }
}
