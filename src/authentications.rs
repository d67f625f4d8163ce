use anyhow::Context;
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::error::{ApiError, Result};

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenPayload {
    pub refresh_token: String,
}

/// Stores the refresh tokens that are currently allowed to mint access tokens.
#[derive(Clone)]
pub struct AuthenticationDatabase {
    pool: SqlitePool,
}

impl AuthenticationDatabase {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add_refresh_token(&self, token: &str) -> Result<()> {
        sqlx::query("INSERT INTO authentications (token) VALUES (?)")
            .bind(token)
            .execute(&self.pool)
            .await
            .context("Failed to store refresh token")?;
        Ok(())
    }

    pub async fn verify_refresh_token(&self, token: &str) -> Result<()> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM authentications WHERE token = ?",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await
        .context("Failed to look up refresh token")?;

        if count == 0 {
            return Err(ApiError::invariant("Refresh token is invalid"));
        }

        Ok(())
    }

    pub async fn delete_refresh_token(&self, token: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM authentications WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await
            .context("Failed to delete refresh token")?;

        if result.rows_affected() == 0 {
            return Err(ApiError::invariant("Refresh token is invalid"));
        }

        Ok(())
    }
}
