//! HS256 bearer tokens with an in-process revocation list.

use crate::core::config::AuthConfig;
use crate::core::error::{ApiError, ApiResult};
use chrono::Utc;
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Issues, verifies and revokes tokens.
///
/// Revoked tokens are remembered until their own expiry, after which the
/// signature check rejects them anyway.
pub struct JwtAuthenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,

    /// token -> exp
    revoked: DashMap<String, i64>,
}

impl JwtAuthenticator {
    pub fn new(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_ttl,
            refresh_ttl,
            revoked: DashMap::new(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        if config.jwt_secret.is_empty() {
            warn!("JWT secret is empty; tokens are signed with an empty key");
        }
        Self::new(&config.jwt_secret, config.access_token_ttl, config.refresh_token_ttl)
    }

    pub fn issue_tokens(&self, user_id: &str) -> ApiResult<TokenPair> {
        Ok(TokenPair {
            access_token: self.sign(user_id, self.access_ttl)?,
            refresh_token: self.sign(user_id, self.refresh_ttl)?,
        })
    }

    fn sign(&self, user_id: &str, ttl: Duration) -> ApiResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: user_id.to_string(),
            iat: now,
            exp: now + ttl.as_secs() as i64,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ApiError::internal(format!("Failed to sign token: {}", e)))
    }

    /// Decode a token that is neither revoked, expired nor issued in the future
    pub fn verify(&self, token: &str) -> ApiResult<Claims> {
        if self.revoked.contains_key(token) {
            return Err(ApiError::auth("Token has been revoked"));
        }

        let claims = self.decode(token)?;
        if claims.iat > Utc::now().timestamp() {
            return Err(ApiError::auth("Token used before issued time"));
        }
        Ok(claims)
    }

    /// Revoke a currently valid token
    pub fn revoke(&self, token: &str) -> ApiResult<()> {
        let claims = self
            .decode(token)
            .map_err(|_| ApiError::auth("Invalid token for revocation"))?;

        self.purge_expired();
        self.revoked.insert(token.to_string(), claims.exp);
        debug!(user_id = %claims.user_id, "Token revoked");
        Ok(())
    }

    pub fn is_revoked(&self, token: &str) -> bool {
        self.revoked.contains_key(token)
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }

    fn decode(&self, token: &str) -> ApiResult<Claims> {
        Ok(decode::<Claims>(token, &self.decoding, &self.validation)?.claims)
    }

    fn purge_expired(&self) {
        let now = Utc::now().timestamp();
        self.revoked.retain(|_, exp| *exp >= now);
    }
}
