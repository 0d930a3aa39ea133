//! # Warehouse Module
//!
//! Read-only access to the analytical warehouse that backs every endpoint.
//!
//! - [`Warehouse`]: the seam handlers talk to (listing tables, running queries)
//! - [`query`]: SQL builders for table browsing, entity lookups and the filter function
//! - [`records`]: typed lookups on top of a [`Warehouse`]
//! - [`bigquery`]: BigQuery REST implementation

pub mod bigquery;
pub mod query;
pub mod records;

pub use bigquery::{BigQueryClient, BigQueryConfig, Credentials, ServiceAccountKey};
pub use query::{DataAmountFilter, EntityLookup, Page, TableQuery};
pub use records::{PagedRecords, Pagination, RecordRepository};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// A result row: column name to JSON value, in schema order
pub type Row = serde_json::Map<String, serde_json::Value>;

pub type WarehouseResult<T> = Result<T, WarehouseError>;

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("Invalid table name: {name}")]
    InvalidIdentifier { name: String },

    #[error("{message}")]
    InvalidFilter { message: String },

    #[error("Warehouse request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Warehouse returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Warehouse authentication failed: {message}")]
    Auth { message: String },

    #[error("Unexpected warehouse response: {message}")]
    Decode { message: String },

    #[error("Warehouse configuration error: {message}")]
    Configuration { message: String },
}

impl WarehouseError {
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}

/// Named query parameter; every parameter is sent as a nullable `STRING`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryParam {
    pub name: String,
    pub value: Option<String>,
}

/// SQL text with `@name` placeholders and their values
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

impl Query {
    pub fn new<S: Into<String>>(sql: S) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn param<N: Into<String>>(mut self, name: N, value: Option<String>) -> Self {
        self.params.push(QueryParam {
            name: name.into(),
            value,
        });
        self
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Identifiers of the tables in the configured dataset
    async fn list_tables(&self) -> WarehouseResult<Vec<String>>;

    /// Run a read query and return all rows
    async fn query(&self, query: &Query) -> WarehouseResult<Vec<Row>>;
}
