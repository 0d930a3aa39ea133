//! Success envelopes.
//!
//! Error envelopes are produced by [`crate::core::error::ApiError`].

use serde::Serialize;
use serde_json::{Map, Value};

/// `{success, table, model, response, error}` returned by the table endpoints
#[derive(Debug, Clone, Serialize)]
pub struct TableResponse<T> {
    pub success: bool,
    pub table: String,
    pub model: &'static str,
    pub response: T,
    pub error: Option<Value>,
}

impl<T: Serialize> TableResponse<T> {
    pub fn ok(table: impl Into<String>, model: &'static str, response: T) -> Self {
        Self {
            success: true,
            table: table.into(),
            model,
            response,
            error: None,
        }
    }
}

/// `{success, response: {message, exists, ...}, action, error}` returned by lookups
#[derive(Debug, Clone, Serialize)]
pub struct CheckResponse {
    pub success: bool,
    pub response: Map<String, Value>,
    pub action: &'static str,
    pub error: Option<Value>,
}

impl CheckResponse {
    pub fn new(message: impl Into<String>, exists: bool, action: &'static str) -> Self {
        let mut response = Map::new();
        response.insert("message".to_string(), Value::String(message.into()));
        response.insert("exists".to_string(), Value::Bool(exists));
        Self {
            success: true,
            response,
            action,
            error: None,
        }
    }

    /// Add one field to `response`
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.response.insert(name.to_string(), value.into());
        self
    }

    /// Copy the named columns of a row into `response`, missing columns become `null`
    pub fn columns(mut self, row: &Map<String, Value>, names: &[&str]) -> Self {
        for name in names {
            let value = row.get(*name).cloned().unwrap_or(Value::Null);
            self.response.insert(name.to_string(), value);
        }
        self
    }

    /// Copy every column of a row into `response`
    pub fn row(mut self, row: Map<String, Value>) -> Self {
        self.response.extend(row);
        self
    }
}
