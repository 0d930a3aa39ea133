//! # Error Handling Module
//!
//! This module defines the error type returned at the HTTP boundary of the gateway.
//! Lower layers (cache, warehouse) have their own `thiserror` enums which convert
//! into [`ApiError`]; the conversion decides which HTTP status the client sees.
//!
//! ## Error Envelope
//! Every error response carries the same JSON shape:
//! ```json
//! {
//!   "success": false,
//!   "timestamp": "2024-01-01T00:00:00Z",
//!   "statusCode": 404,
//!   "type": "NOT_FOUND_ERROR",
//!   "message": "Salary data not found for the provided unique_id"
//! }
//! ```
//! Validation failures additionally carry a `details` array with one entry per field.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::caching::CacheError;
use crate::warehouse::WarehouseError;

/// Main result type used by handlers and startup code
pub type ApiResult<T> = Result<T, ApiError>;

/// A single field that failed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Name of the offending field (body key, path or query parameter)
    pub field: String,

    /// Human readable explanation
    pub message: String,
}

impl FieldError {
    pub fn new<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced to API clients
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid or missing configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Request input failed validation
    #[error("{message}")]
    Validation {
        message: String,
        details: Vec<FieldError>,
    },

    /// Missing, malformed, expired or revoked credentials
    #[error("{reason}")]
    Authentication { reason: String },

    /// Authenticated caller is not allowed to perform the action
    #[error("{reason}")]
    Authorization { reason: String },

    /// The warehouse holds no row for the requested identifier
    #[error("{message}")]
    NotFound { message: String },

    /// Client exceeded the request budget of its window
    #[error("{message}")]
    RateLimitExceeded { message: String },

    /// The warehouse query failed
    #[error("{message}")]
    Database { message: String },

    /// A cache operation whose failure must be reported (invalidation, corrupt entries)
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Anything else
    #[error("{message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn validation<S: Into<String>>(message: S, details: Vec<FieldError>) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }

    /// Shorthand for a validation failure on a single field
    pub fn invalid_field<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::validation("Validation failed", vec![FieldError::new(field, message)])
    }

    pub fn auth<S: Into<String>>(reason: S) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    pub fn authz<S: Into<String>>(reason: S) -> Self {
        Self::Authorization {
            reason: reason.into(),
        }
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn database<S: Into<String>>(message: S) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code returned for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::Authorization { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Configuration { .. }
            | Self::Database { .. }
            | Self::Cache(_)
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error type tag used in the response envelope
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Authentication { .. } => "AUTHENTICATION_ERROR",
            Self::Authorization { .. } => "AUTHORIZATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND_ERROR",
            Self::RateLimitExceeded { .. } => "TOO_MANY_REQUESTS",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Internal { .. } => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Message placed in the response envelope. Cache failures keep backend
    /// detail in the logs only.
    pub fn client_message(&self) -> String {
        match self {
            Self::Cache(CacheError::OperationFailed { message, .. }) => message.clone(),
            Self::Cache(CacheError::Serialization(_)) => "Cached response is corrupt".to_string(),
            Self::Cache(_) => "Cache operation failed".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<WarehouseError> for ApiError {
    fn from(err: WarehouseError) -> Self {
        match err {
            WarehouseError::InvalidIdentifier { ref name } => {
                Self::invalid_field("tableName", format!("tableName '{}' is not a valid table name", name))
            }
            WarehouseError::InvalidFilter { message } => Self::validation(message, Vec::new()),
            other => Self::database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(format!("I/O error: {}", err))
    }
}

impl From<serde_yaml::Error> for ApiError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::config(format!("YAML error: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for ApiError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::auth("Token has expired"),
            ErrorKind::ImmatureSignature => Self::auth("Token used before issued time"),
            _ => Self::auth(format!("Invalid token: {}", err)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, error_type = self.error_type(), "Request failed");
        } else {
            tracing::debug!(error = %self, error_type = self.error_type(), "Request rejected");
        }

        let mut body = json!({
            "success": false,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "statusCode": status.as_u16(),
            "type": self.error_type(),
            "message": self.client_message(),
        });

        if let Self::Validation { details, .. } = &self {
            if !details.is_empty() {
                body["details"] = json!(details);
            }
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::invalid_field("unique_id", "required").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::auth("missing").status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::authz("denied").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::not_found("nope").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::database("boom").status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ApiError::RateLimitExceeded { message: "slow down".into() }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_cache_failure_is_server_error() {
        let err = ApiError::from(CacheError::Unavailable);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_type(), "CACHE_ERROR");
    }

    #[tokio::test]
    async fn test_cache_envelope_hides_backend_detail() {
        let err = ApiError::from(CacheError::OperationFailed {
            message: "Failed to clear cache".to_string(),
            source: Box::new(CacheError::backend("ERR unknown command 'KEYS'")),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["type"], "CACHE_ERROR");
        assert_eq!(body["message"], "Failed to clear cache");

        let err = ApiError::from(CacheError::backend("WRONGTYPE Operation against a key"));
        assert_eq!(err.client_message(), "Cache operation failed");
    }

    #[test]
    fn test_invalid_identifier_maps_to_validation() {
        let err = ApiError::from(WarehouseError::InvalidIdentifier { name: "a;b".into() });
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        match err {
            ApiError::Validation { details, .. } => assert_eq!(details[0].field, "tableName"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_envelope() {
        let response = ApiError::invalid_field("unique_id", "unique_id is required").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["statusCode"], 400);
        assert_eq!(body["type"], "VALIDATION_ERROR");
        assert_eq!(body["details"][0]["field"], "unique_id");
    }
}
