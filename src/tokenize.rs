use anyhow::Context;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub id: String,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// Signs and verifies access and refresh tokens.
#[derive(Clone)]
pub struct TokenManager {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_token_age: u64,
}

impl TokenManager {
    pub fn new(access_key: &str, refresh_key: &str, access_token_age: u64) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(access_key.as_bytes()),
            access_decoding: DecodingKey::from_secret(access_key.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh_key.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh_key.as_bytes()),
            access_token_age,
        }
    }

    pub fn generate_access_token(&self, user_id: &str) -> Result<String> {
        let iat = chrono::Utc::now().timestamp();
        let claims = TokenClaims {
            id: user_id.to_string(),
            iat,
            exp: Some(iat + self.access_token_age as i64),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.access_encoding)
            .context("Failed to sign access token")
            .map_err(ApiError::from)
    }

    pub fn generate_refresh_token(&self, user_id: &str) -> Result<String> {
        let claims = TokenClaims {
            id: user_id.to_string(),
            iat: chrono::Utc::now().timestamp(),
            exp: None,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.refresh_encoding)
            .context("Failed to sign refresh token")
            .map_err(ApiError::from)
    }

    /// Returns the user id carried by a valid, unexpired access token.
    pub fn verify_access_token(&self, token: &str) -> Result<String> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<TokenClaims>(token, &self.access_decoding, &validation)
            .map(|data| data.claims.id)
            .map_err(|e| {
                tracing::debug!("Rejected access token: {}", e);
                ApiError::authentication("Missing or invalid access token")
            })
    }

    /// Refresh tokens never expire on their own; they live until deleted.
    pub fn verify_refresh_token(&self, token: &str) -> Result<String> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        decode::<TokenClaims>(token, &self.refresh_decoding, &validation)
            .map(|data| data.claims.id)
            .map_err(|_| ApiError::invariant("Refresh token is invalid"))
    }
}
