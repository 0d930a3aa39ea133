//! # Observability Module
//!
//! Logging setup. Request spans come from the trace layer in
//! [`crate::middleware::request_logging`].

pub mod logging;

pub use logging::init as init_logging;
