use anyhow::Context;
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::db::{generate_id, is_unique_violation};
use crate::error::{ApiError, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationPayload {
    pub playlist_id: String,
    pub user_id: String,
}

/// Grants non-owners access to a playlist.
#[derive(Clone)]
pub struct CollaborationDatabase {
    pool: SqlitePool,
}

impl CollaborationDatabase {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add_collaboration(&self, playlist_id: &str, user_id: &str) -> Result<String> {
        let id = generate_id("collaboration");

        let result = sqlx::query(
            "INSERT INTO collaborations (id, playlist_id, user_id) VALUES (?, ?, ?)",
        )
        .bind(&id)
        .bind(playlist_id)
        .bind(user_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!("User {} now collaborates on {}", user_id, playlist_id);
                Ok(id)
            }
            Err(e) if is_unique_violation(&e) => Err(ApiError::invariant(
                "Failed to add collaboration. User is already a collaborator",
            )),
            Err(e) => Err(anyhow::Error::new(e)
                .context("Failed to insert collaboration")
                .into()),
        }
    }

    pub async fn delete_collaboration(&self, playlist_id: &str, user_id: &str) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM collaborations WHERE playlist_id = ? AND user_id = ?")
                .bind(playlist_id)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .context("Failed to delete collaboration")?;

        if result.rows_affected() == 0 {
            return Err(ApiError::invariant(
                "Failed to delete collaboration. Collaboration not found",
            ));
        }

        Ok(())
    }

    pub async fn is_collaborator(&self, playlist_id: &str, user_id: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM collaborations WHERE playlist_id = ? AND user_id = ?",
        )
        .bind(playlist_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to verify collaborator")?;

        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connect_in_memory, migrate};

    async fn setup() -> CollaborationDatabase {
        let pool = connect_in_memory().await.unwrap();
        migrate(&pool).await.unwrap();
        sqlx::query("INSERT INTO users (id, username, password, fullname) VALUES ('user-owner', 'o', 'x', 'O'), ('user-guest', 'g', 'x', 'G')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO playlists (id, name, owner) VALUES ('playlist-1', 'Shared', 'user-owner')")
            .execute(&pool)
            .await
            .unwrap();
        CollaborationDatabase::new(pool)
    }

    #[tokio::test]
    async fn test_add_check_and_remove() {
        let collaborations = setup().await;
        assert!(!collaborations.is_collaborator("playlist-1", "user-guest").await.unwrap());

        collaborations.add_collaboration("playlist-1", "user-guest").await.unwrap();
        assert!(collaborations.is_collaborator("playlist-1", "user-guest").await.unwrap());

        collaborations.delete_collaboration("playlist-1", "user-guest").await.unwrap();
        assert!(!collaborations.is_collaborator("playlist-1", "user-guest").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_and_missing_collaboration() {
        let collaborations = setup().await;
        collaborations.add_collaboration("playlist-1", "user-guest").await.unwrap();
        assert!(matches!(
            collaborations.add_collaboration("playlist-1", "user-guest").await,
            Err(ApiError::Invariant(_))
        ));
        assert!(matches!(
            collaborations.delete_collaboration("playlist-1", "user-owner").await,
            Err(ApiError::Invariant(_))
        ));
    }
}
