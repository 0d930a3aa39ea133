//! # BigQuery Client
//!
//! [`Warehouse`] implementation on top of the BigQuery v2 REST API.
//!
//! - Queries go through `jobs.query` with standard SQL and named parameters.
//!   Long-running jobs and multi-page results are followed via `getQueryResults`.
//! - Tables are listed with `tables.list`, following page tokens.
//! - Rows arrive in the `{"f": [{"v": ...}]}` wire format and are converted to
//!   JSON objects using the result schema.
//!
//! Authentication uses either a static bearer token or a service-account key.
//! With a key, an RS256-signed assertion is exchanged at the key's token URI
//! and the access token is reused until shortly before it expires.

use super::{Query, Row, Warehouse, WarehouseError, WarehouseResult};
use crate::core::config::WarehouseConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// OAuth scope requested for service-account tokens
pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery.readonly";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields of a service-account key file this client needs
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Debug, Clone)]
pub enum Credentials {
    /// No `Authorization` header, for emulators
    Anonymous,
    AccessToken(String),
    ServiceAccount(ServiceAccountKey),
}

impl Credentials {
    pub async fn from_key_file(path: &Path) -> WarehouseResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| WarehouseError::Configuration {
                message: format!("Cannot read credentials file {}: {}", path.display(), e),
            })?;

        let key: ServiceAccountKey = serde_json::from_str(&content).map_err(|e| WarehouseError::Configuration {
            message: format!("Invalid credentials file {}: {}", path.display(), e),
        })?;
        Ok(Self::ServiceAccount(key))
    }
}

#[derive(Debug, Clone)]
pub struct BigQueryConfig {
    pub project_id: String,

    /// Dataset whose tables are listed
    pub dataset: String,
    pub location: Option<String>,

    /// Base URL of the v2 API, without trailing slash
    pub endpoint: String,
    pub request_timeout: Duration,
    pub credentials: Credentials,
}

impl BigQueryConfig {
    /// Build from the application settings; a static token wins over a key file
    pub async fn from_settings(settings: &WarehouseConfig) -> WarehouseResult<Self> {
        let credentials = match (&settings.access_token, &settings.credentials_path) {
            (Some(token), _) if !token.is_empty() => Credentials::AccessToken(token.clone()),
            (_, Some(path)) => Credentials::from_key_file(path).await?,
            _ => Credentials::Anonymous,
        };

        Ok(Self {
            project_id: settings.project_id.clone(),
            dataset: settings.schema.clone(),
            location: settings.location.clone(),
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            request_timeout: settings.request_timeout,
            credentials,
        })
    }
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct BigQueryClient {
    config: BigQueryConfig,
    http: reqwest::Client,
    token: RwLock<Option<CachedToken>>,
}

impl BigQueryClient {
    pub fn new(config: BigQueryConfig) -> WarehouseResult<Self> {
        if config.project_id.trim().is_empty() {
            return Err(WarehouseError::Configuration {
                message: "Warehouse project id is not set".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            config,
            http,
            token: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &BigQueryConfig {
        &self.config
    }

    fn project_url(&self) -> String {
        format!("{}/projects/{}", self.config.endpoint, self.config.project_id)
    }

    async fn bearer(&self) -> WarehouseResult<Option<String>> {
        let key = match &self.config.credentials {
            Credentials::Anonymous => return Ok(None),
            Credentials::AccessToken(token) => return Ok(Some(token.clone())),
            Credentials::ServiceAccount(key) => key,
        };

        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if Instant::now() < token.refresh_at {
                    return Ok(Some(token.value.clone()));
                }
            }
        }

        let fresh = self.exchange(key).await?;
        let value = fresh.value.clone();
        *self.token.write().await = Some(fresh);
        Ok(Some(value))
    }

    async fn exchange(&self, key: &ServiceAccountKey) -> WarehouseResult<CachedToken> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: BIGQUERY_SCOPE,
            aud: &key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| WarehouseError::auth(format!("Invalid service account key: {}", e)))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| WarehouseError::auth(format!("Cannot sign token request: {}", e)))?;

        let response = self
            .http
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WarehouseError::auth(format!("Token exchange returned {}: {}", status, body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| WarehouseError::auth(format!("Malformed token response: {}", e)))?;
        info!("Obtained warehouse access token for {}", key.client_email);

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        Ok(CachedToken {
            value: token.access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> WarehouseResult<T> {
        let request = match self.bearer().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or(body);
            return Err(WarehouseError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| WarehouseError::decode(e.to_string()))
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn list_tables(&self) -> WarehouseResult<Vec<String>> {
        let url = format!("{}/datasets/{}/tables", self.project_url(), self.config.dataset);
        let mut tables = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(&url);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let page: TableList = self.send(request).await?;
            tables.extend(page.tables.into_iter().map(|table| table.table_reference.table_id));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(dataset = %self.config.dataset, count = tables.len(), "Listed warehouse tables");
        Ok(tables)
    }

    async fn query(&self, query: &Query) -> WarehouseResult<Vec<Row>> {
        let timeout_ms = self.config.request_timeout.as_millis() as u64;
        let body = QueryRequest {
            query: &query.sql,
            use_legacy_sql: false,
            parameter_mode: "NAMED",
            query_parameters: query
                .params
                .iter()
                .map(|param| ParameterPayload {
                    name: &param.name,
                    parameter_type: ParameterType { kind: "STRING" },
                    parameter_value: ParameterValue {
                        value: param.value.as_deref(),
                    },
                })
                .collect(),
            location: self.config.location.as_deref(),
            timeout_ms,
        };

        debug!(sql = %query.sql, params = query.params.len(), "Running warehouse query");
        let mut response: QueryResponse = self
            .send(self.http.post(format!("{}/queries", self.project_url())).json(&body))
            .await?;

        let mut schema: Option<TableSchema> = None;
        let mut job: Option<JobReference> = None;
        let mut rows = Vec::new();

        loop {
            if response.job_reference.is_some() {
                job = response.job_reference.take();
            }

            let mut page_token = None;
            if response.job_complete {
                if response.schema.is_some() {
                    schema = response.schema.take();
                }
                let fields = schema.as_ref().map(|s| s.fields.as_slice()).unwrap_or(&[]);
                for cells in response.rows.drain(..) {
                    rows.push(convert_row(fields, cells.f)?);
                }

                match response.page_token.take() {
                    Some(token) if !token.is_empty() => page_token = Some(token),
                    _ => break,
                }
            }

            let job_ref = job
                .as_ref()
                .ok_or_else(|| WarehouseError::decode("Query is still running but has no job reference"))?;

            let mut request = self
                .http
                .get(format!("{}/queries/{}", self.project_url(), job_ref.job_id))
                .query(&[("timeoutMs", timeout_ms.to_string())]);
            if let Some(token) = page_token {
                request = request.query(&[("pageToken", token)]);
            }
            if let Some(location) = job_ref.location.as_deref().or(self.config.location.as_deref()) {
                request = request.query(&[("location", location)]);
            }

            response = self.send(request).await?;
        }

        Ok(rows)
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    parameter_mode: &'static str,
    query_parameters: Vec<ParameterPayload<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    timeout_ms: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParameterPayload<'a> {
    name: &'a str,
    parameter_type: ParameterType,
    parameter_value: ParameterValue<'a>,
}

#[derive(Serialize)]
struct ParameterType {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// A missing `value` is how the API encodes a NULL parameter
#[derive(Serialize)]
struct ParameterValue<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<WireRow>,
    page_token: Option<String>,
    job_reference: Option<JobReference>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Deserialize)]
struct WireRow {
    #[serde(default)]
    f: Vec<WireCell>,
}

#[derive(Deserialize)]
struct WireCell {
    #[serde(default)]
    v: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    #[serde(default)]
    tables: Vec<TableEntry>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableEntry {
    table_reference: TableReference,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    table_id: String,
}

fn convert_row(fields: &[FieldSchema], cells: Vec<WireCell>) -> WarehouseResult<Row> {
    if cells.len() != fields.len() {
        return Err(WarehouseError::decode(format!(
            "Row has {} cells but the schema has {} fields",
            cells.len(),
            fields.len()
        )));
    }

    let mut row = Row::new();
    for (field, cell) in fields.iter().zip(cells) {
        row.insert(field.name.clone(), convert_value(field, cell.v)?);
    }
    Ok(row)
}

fn convert_value(field: &FieldSchema, value: Value) -> WarehouseResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    if field.mode.as_deref() == Some("REPEATED") {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(WarehouseError::decode(format!(
                    "Repeated field {} is not an array: {}",
                    field.name, other
                )))
            }
        };

        return items
            .into_iter()
            .map(|item| {
                let inner = match item {
                    Value::Object(mut cell) => cell.remove("v").unwrap_or(Value::Null),
                    other => other,
                };
                convert_single(field, inner)
            })
            .collect::<WarehouseResult<Vec<_>>>()
            .map(Value::Array);
    }

    convert_single(field, value)
}

fn convert_single(field: &FieldSchema, value: Value) -> WarehouseResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    let kind = field.kind.to_ascii_uppercase();
    if kind == "RECORD" || kind == "STRUCT" {
        let cells = match value {
            Value::Object(mut record) => record.remove("f").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        let cells: Vec<WireCell> = serde_json::from_value(cells)
            .map_err(|e| WarehouseError::decode(format!("Record field {}: {}", field.name, e)))?;
        return convert_row(&field.fields, cells).map(Value::Object);
    }

    let text = match value.as_str() {
        Some(text) => text,
        None => return Ok(value),
    };

    let converted = match kind.as_str() {
        "INTEGER" | "INT64" => text.parse::<i64>().ok().map(Value::from),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        "BOOLEAN" | "BOOL" => match text {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        "TIMESTAMP" => text.parse::<f64>().ok().and_then(timestamp_from_seconds).map(Value::String),
        _ => Some(Value::String(text.to_string())),
    };

    // Values that do not parse (NaN, huge NUMERICs) stay strings
    Ok(converted.unwrap_or_else(|| Value::String(text.to_string())))
}

fn timestamp_from_seconds(seconds: f64) -> Option<String> {
    let micros = (seconds * 1_000_000.0).round() as i64;
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos).map(|ts| ts.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(value: Value) -> Vec<FieldSchema> {
        serde_json::from_value(value).unwrap()
    }

    fn cells(value: Value) -> Vec<WireCell> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_scalar_conversion() {
        let fields = schema(json!([
            { "name": "tech", "type": "STRING" },
            { "name": "amount", "type": "INTEGER" },
            { "name": "salary_net", "type": "FLOAT" },
            { "name": "active", "type": "BOOLEAN" },
            { "name": "note", "type": "STRING" }
        ]));
        let row = convert_row(
            &fields,
            cells(json!([{ "v": "Rust" }, { "v": "42" }, { "v": "4200.5" }, { "v": "true" }, { "v": null }])),
        )
        .unwrap();

        assert_eq!(
            Value::Object(row),
            json!({ "tech": "Rust", "amount": 42, "salary_net": 4200.5, "active": true, "note": null })
        );
    }

    #[test]
    fn test_column_order_follows_schema() {
        let fields = schema(json!([{ "name": "z", "type": "STRING" }, { "name": "a", "type": "STRING" }]));
        let row = convert_row(&fields, cells(json!([{ "v": "1" }, { "v": "2" }]))).unwrap();
        assert_eq!(row.keys().collect::<Vec<_>>(), vec!["z", "a"]);
    }

    #[test]
    fn test_repeated_and_record_conversion() {
        let fields = schema(json!([
            { "name": "tags", "type": "STRING", "mode": "REPEATED" },
            { "name": "pay", "type": "RECORD", "fields": [
                { "name": "net", "type": "INTEGER" },
                { "name": "gross", "type": "INTEGER" }
            ]}
        ]));
        let row = convert_row(
            &fields,
            cells(json!([
                { "v": [{ "v": "a" }, { "v": "b" }] },
                { "v": { "f": [{ "v": "1" }, { "v": "2" }] } }
            ])),
        )
        .unwrap();

        assert_eq!(row["tags"], json!(["a", "b"]));
        assert_eq!(row["pay"], json!({ "net": 1, "gross": 2 }));
    }

    #[test]
    fn test_timestamp_conversion() {
        let fields = schema(json!([{ "name": "at", "type": "TIMESTAMP" }]));
        let row = convert_row(&fields, cells(json!([{ "v": "1.7040672E9" }]))).unwrap();
        assert_eq!(row["at"], "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_unparsable_values_stay_strings() {
        let fields = schema(json!([{ "name": "x", "type": "FLOAT" }]));
        let row = convert_row(&fields, cells(json!([{ "v": "NaN" }]))).unwrap();
        assert_eq!(row["x"], "NaN");
    }

    #[test]
    fn test_cell_count_mismatch() {
        let fields = schema(json!([{ "name": "x", "type": "STRING" }]));
        assert!(matches!(
            convert_row(&fields, cells(json!([]))),
            Err(WarehouseError::Decode { .. })
        ));
    }

    #[test]
    fn test_null_parameters_omit_value() {
        let payload = ParameterPayload {
            name: "parameter_tech",
            parameter_type: ParameterType { kind: "STRING" },
            parameter_value: ParameterValue { value: None },
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({ "name": "parameter_tech", "parameterType": { "type": "STRING" }, "parameterValue": {} })
        );
    }

    #[test]
    fn test_missing_project_is_rejected() {
        let config = BigQueryConfig {
            project_id: String::new(),
            dataset: "app_demo".into(),
            location: None,
            endpoint: "http://localhost".into(),
            request_timeout: Duration::from_secs(1),
            credentials: Credentials::Anonymous,
        };
        assert!(matches!(BigQueryClient::new(config), Err(WarehouseError::Configuration { .. })));
    }
}
