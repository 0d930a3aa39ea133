//! # Authentication Module
//!
//! - [`jwt`]: token issuing, verification and revocation
//! - [`middleware`]: bearer-token guard for protected routes

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtAuthenticator, TokenPair};
pub use middleware::{extract_token, require_bearer, AuthenticatedUser};
