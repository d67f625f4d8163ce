use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::db::{generate_id, is_unique_violation};
use crate::error::{ApiError, Result};

const BCRYPT_COST: u32 = 10;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub fullname: String,
}

#[derive(Debug, Deserialize)]
pub struct UserPayload {
    pub username: String,
    pub password: String,
    pub fullname: String,
}

#[derive(Clone)]
pub struct UserDatabase {
    pool: SqlitePool,
}

impl UserDatabase {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add_user(&self, payload: &UserPayload) -> Result<String> {
        self.verify_new_username(&payload.username).await?;

        let id = generate_id("user");
        let password = payload.password.clone();
        let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(password, BCRYPT_COST))
            .await
            .context("Password hashing task failed")?
            .context("Failed to hash password")?;

        let result = sqlx::query(
            "INSERT INTO users (id, username, password, fullname) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&payload.username)
        .bind(&hashed)
        .bind(&payload.fullname)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::info!("Registered user {} ({})", payload.username, id);
                Ok(id)
            }
            // lost a race against another registration
            Err(e) if is_unique_violation(&e) => Err(username_taken()),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to insert user").into()),
        }
    }

    async fn verify_new_username(&self, username: &str) -> Result<()> {
        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .context("Failed to check username")?;

        if exists > 0 {
            return Err(username_taken());
        }

        Ok(())
    }

    pub async fn get_user_by_id(&self, id: &str) -> Result<User> {
        sqlx::query_as::<_, User>("SELECT id, username, fullname FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user")?
            .ok_or_else(|| ApiError::not_found("User not found"))
    }

    /// Check a username/password pair and return the user id.
    pub async fn verify_user_credential(&self, username: &str, password: &str) -> Result<String> {
        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT id, password FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user credential")?;

        let Some((id, hashed)) = row else {
            return Err(wrong_credentials());
        };

        let password = password.to_string();
        let matched = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hashed))
            .await
            .context("Password verification task failed")?
            .context("Failed to verify password")?;

        if !matched {
            return Err(wrong_credentials());
        }

        Ok(id)
    }
}

fn username_taken() -> ApiError {
    ApiError::invariant("Failed to add user. Username is already used")
}

fn wrong_credentials() -> ApiError {
    ApiError::authentication("The credentials you provided are wrong")
}
