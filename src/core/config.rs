//! # Configuration Module
//!
//! Configuration is read from a YAML file (optional) and then overridden by
//! environment variables, so a container can run with nothing but env vars.
//!
//! ## Key Features
//! - YAML parsing with serde, every section has defaults
//! - Environment variable override support
//! - Validation with descriptive error messages

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::{ApiError, ApiResult};

/// Environment variable holding the configuration file path
pub const CONFIG_PATH_ENV: &str = "APP_CONFIG_PATH";

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/app.yaml";

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Production => "production",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "test" => Some(Self::Test),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment environment; `test` enables the cache pre-flight bypass
    pub environment: Environment,

    /// HTTP server settings
    pub server: ServerConfig,

    /// Log output settings
    pub logging: LoggingConfig,

    /// Warehouse connection settings
    pub warehouse: WarehouseConfig,

    /// Response cache settings
    pub cache: CacheConfig,

    /// Per-client request limits
    pub rate_limiting: RateLimitingConfig,

    /// Default paging for table browsing
    pub pagination: PaginationConfig,

    /// Token settings
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,

    /// Mount point of every API route
    pub api_route: String,

    /// Emit a tracing span per HTTP request
    pub log_requests: bool,

    /// Grace period for in-flight requests and pending cache writes on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3001,
            api_route: "/api".to_string(),
            log_requests: false,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, `RUST_LOG` wins when set
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "tabu_gateway=info,tower_http=info".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Google Cloud project that owns the dataset
    pub project_id: String,

    /// Dataset holding the tables (the "schema" in SQL)
    pub schema: String,

    /// Job location
    pub location: Option<String>,

    /// REST endpoint base
    pub endpoint: String,

    /// Service account key file
    pub credentials_path: Option<PathBuf>,

    /// Pre-issued OAuth access token, used when no key file is configured
    pub access_token: Option<String>,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            schema: "app_demo".to_string(),
            location: Some("US".to_string()),
            endpoint: "https://bigquery.googleapis.com/bigquery/v2".to_string(),
            credentials_path: None,
            access_token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false every cached route behaves as if the backend were down
    pub enabled: bool,
    pub backend: CacheBackendKind,
    pub redis_url: String,

    /// Prepended to every key and invalidation pattern
    pub namespace: String,

    /// TTL in seconds when a route does not specify one
    pub default_ttl: u64,

    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub invalidation_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// How often the Redis watcher pings and reconnects
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,

    /// Responses larger than this are served but not cached
    pub max_body_bytes: usize,

    pub durations: CacheDurations,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackendKind::Redis,
            redis_url: "redis://tabu-redis:6379".to_string(),
            namespace: "tabu".to_string(),
            default_ttl: 3600,
            read_timeout: Duration::from_millis(1000),
            write_timeout: Duration::from_millis(1000),
            probe_timeout: Duration::from_millis(1000),
            invalidation_timeout: Duration::from_millis(2000),
            connection_timeout: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(5),
            max_body_bytes: 8 * 1024 * 1024,
            durations: CacheDurations::default(),
        }
    }
}

/// Per-route TTLs in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheDurations {
    pub tables: u64,
    pub records: u64,
}

impl Default for CacheDurations {
    fn default() -> Self {
        Self {
            tables: 3600,
            records: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    pub enabled: bool,

    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Requests allowed per client per window
    pub max: u32,
    pub message: String,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_millis(900_000),
            max: 100,
            message: "Too many requests from this IP, please try again later.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub limit: u32,
    pub offset: u64,
    pub max_limit: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
            max_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret
    pub jwt_secret: String,

    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,

    #[serde(with = "humantime_serde")]
    pub refresh_token_ttl: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file, then apply environment overrides
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ApiResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            ApiError::config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `APP_CONFIG_PATH` (or the default path) when the file exists,
    /// otherwise start from defaults. Environment overrides apply either way.
    pub async fn load() -> ApiResult<Self> {
        let path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Self::load_from_file(&path).await;
        }

        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> ApiResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| ApiError::config(format!("Failed to parse config: {}", e)))
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> ApiResult<()> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> ApiResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("APP_ENV") {
            self.environment = Environment::parse(&value)
                .ok_or_else(|| ApiError::config(format!("Invalid APP_ENV: {}", value)))?;
        }

        if let Some(port) = lookup("PORT") {
            self.server.port = parse_var("PORT", &port)?;
        }
        if let Some(addr) = lookup("BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
        if let Some(route) = lookup("API_ROUTE") {
            self.server.api_route = route;
        }
        if let Some(flag) = lookup("LOG_REQUESTS") {
            self.server.log_requests = flag == "true";
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => return Err(ApiError::config(format!("Invalid LOG_FORMAT: {}", other))),
            };
        }

        if let Some(schema) = lookup("DB_SCHEMA") {
            self.warehouse.schema = schema;
        }
        if let Some(project) = lookup("GCP_PROJECT_ID") {
            self.warehouse.project_id = project;
        }
        if let Some(path) = lookup("GOOGLE_APPLICATION_CREDENTIALS") {
            self.warehouse.credentials_path = Some(PathBuf::from(path));
        }
        if let Some(token) = lookup("GOOGLE_OAUTH_ACCESS_TOKEN") {
            self.warehouse.access_token = Some(token);
        }

        if let Some(url) = lookup("REDIS_URL") {
            self.cache.redis_url = url;
        }
        if let Some(flag) = lookup("CACHE_ENABLED") {
            self.cache.enabled = flag == "true";
        }

        if let Some(window) = lookup("RATE_LIMIT_WINDOW_MS") {
            self.rate_limiting.window = Duration::from_millis(parse_var("RATE_LIMIT_WINDOW_MS", &window)?);
        }
        if let Some(max) = lookup("RATE_LIMIT_MAX") {
            self.rate_limiting.max = parse_var("RATE_LIMIT_MAX", &max)?;
        }
        if let Some(message) = lookup("RATE_LIMIT_MESSAGE") {
            self.rate_limiting.message = message;
        }

        if let Some(limit) = lookup("PAGINATION_LIMIT") {
            self.pagination.limit = parse_var("PAGINATION_LIMIT", &limit)?;
        }
        if let Some(offset) = lookup("PAGINATION_OFFSET") {
            self.pagination.offset = parse_var("PAGINATION_OFFSET", &offset)?;
        }

        if let Some(secret) = lookup("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> ApiResult<()> {
        if self.server.port == 0 {
            return Err(ApiError::config("Server port cannot be 0"));
        }
        if !self.server.api_route.starts_with('/') {
            return Err(ApiError::config("API route must start with '/'"));
        }

        if self.warehouse.schema.trim().is_empty() {
            return Err(ApiError::config("Warehouse schema cannot be empty"));
        }

        if self.pagination.limit == 0 {
            return Err(ApiError::config("Pagination limit must be at least 1"));
        }
        if self.pagination.limit > self.pagination.max_limit {
            return Err(ApiError::config(format!(
                "Pagination limit {} exceeds the maximum of {}",
                self.pagination.limit, self.pagination.max_limit
            )));
        }

        if self.rate_limiting.max == 0 {
            return Err(ApiError::config("Rate limit max must be at least 1"));
        }
        if self.rate_limiting.window.is_zero() {
            return Err(ApiError::config("Rate limit window cannot be zero"));
        }

        let timeouts = [
            ("cache.read_timeout", self.cache.read_timeout),
            ("cache.write_timeout", self.cache.write_timeout),
            ("cache.probe_timeout", self.cache.probe_timeout),
            ("cache.invalidation_timeout", self.cache.invalidation_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(ApiError::config(format!("{} cannot be zero", name)));
            }
        }
        if self.cache.default_ttl == 0 {
            return Err(ApiError::config("cache.default_ttl must be at least 1 second"));
        }

        if self.environment == Environment::Production && self.auth.jwt_secret.is_empty() {
            return Err(ApiError::config("JWT_SECRET must be set in production"));
        }

        Ok(())
    }

    /// The pre-flight availability bypass of the cache layer is enabled in test mode
    pub fn is_test_mode(&self) -> bool {
        self.environment == Environment::Test
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> ApiResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::config(format!("Invalid value for {}: {}", name, value)))
}
