pub mod cors;
pub mod rate_limiting;
pub mod request_logging;
pub mod security_headers;

pub use cors::CorsConfig;
pub use rate_limiting::{rate_limit, RateLimitResult, RateLimiter};
pub use request_logging::{trace_layer, RequestTraceLayer};
pub use security_headers::security_headers;
