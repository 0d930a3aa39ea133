use axum::http::{header, HeaderName, Method};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Empty means any origin
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<Method>,
    pub allowed_headers: Vec<HeaderName>,
    pub max_age: Option<Duration>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_methods: vec![Method::GET, Method::POST, Method::DELETE, Method::OPTIONS],
            allowed_headers: vec![header::CONTENT_TYPE, header::AUTHORIZATION],
            max_age: Some(Duration::from_secs(3600)),
        }
    }
}

impl CorsConfig {
    pub fn layer(&self) -> CorsLayer {
        let origins = if self.allowed_origins.is_empty() {
            AllowOrigin::any()
        } else {
            AllowOrigin::list(
                self.allowed_origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok()),
            )
        };

        let layer = CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(self.allowed_methods.clone())
            .allow_headers(self.allowed_headers.clone());

        match self.max_age {
            Some(max_age) => layer.max_age(max_age),
            None => layer,
        }
    }
}
