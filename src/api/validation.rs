//! Request input extraction and validation.
//!
//! Rejections are [`ApiError::Validation`] values, so every malformed request
//! gets the same `400` envelope with one `details` entry per offending field.

use crate::core::config::PaginationConfig;
use crate::core::error::{ApiError, ApiResult, FieldError};
use crate::warehouse::Page;
use axum::async_trait;
use axum::extract::{FromRequest, Request};
use axum::Json;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

/// A JSON object request body
#[derive(Debug, Clone, Default)]
pub struct JsonBody(pub Map<String, Value>);

#[async_trait]
impl<S> FromRequest<S> for JsonBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<Value>::from_request(request, state)
            .await
            .map_err(|rejection| ApiError::invalid_field("body", rejection.body_text()))?;

        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(ApiError::invalid_field("body", "Request body must be a JSON object")),
        }
    }
}

impl JsonBody {
    /// A string field that must be present and non-blank
    pub fn required_str(&self, field: &str) -> ApiResult<String> {
        match self.optional_str(field) {
            Ok(Some(value)) => Ok(value),
            _ => Err(ApiError::invalid_field(
                field,
                format!("{} is required and must be a non-empty string", field),
            )),
        }
    }

    /// A string field that may be absent or `null`; blank strings count as absent
    pub fn optional_str(&self, field: &str) -> ApiResult<Option<String>> {
        match self.0.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) if value.trim().is_empty() => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.trim().to_string())),
            Some(_) => Err(ApiError::invalid_field(field, format!("{} must be a string", field))),
        }
    }

    pub fn required_email(&self, field: &str) -> ApiResult<String> {
        let email = self.required_str(field)?;
        if is_email(&email) {
            Ok(email.to_lowercase())
        } else {
            Err(ApiError::invalid_field(
                field,
                format!("{} must be a valid email address", field),
            ))
        }
    }
}

static EMAIL_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn is_email(value: &str) -> bool {
    EMAIL_PATTERN
        .get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@.]+(\.[^\s@.]+)+$").ok())
        .as_ref()
        .map_or(false, |pattern| pattern.is_match(value))
}

/// `limit` and `offset` query parameters, defaults from configuration
pub fn parse_page(params: &HashMap<String, String>, defaults: &PaginationConfig) -> ApiResult<Page> {
    let mut details = Vec::new();

    let limit = match params.get("limit") {
        None => defaults.limit,
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(limit) if (1..=defaults.max_limit).contains(&limit) => limit,
            _ => {
                details.push(FieldError::new(
                    "limit",
                    format!("limit must be an integer between 1 and {}", defaults.max_limit),
                ));
                defaults.limit
            }
        },
    };

    let offset = match params.get("offset") {
        None => defaults.offset,
        Some(raw) => raw.trim().parse::<u64>().unwrap_or_else(|_| {
            details.push(FieldError::new("offset", "offset must be a non-negative integer"));
            defaults.offset
        }),
    };

    if details.is_empty() {
        Ok(Page { limit, offset })
    } else {
        Err(ApiError::validation("Validation failed", details))
    }
}
