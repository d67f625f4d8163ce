use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::db::generate_id;
use crate::error::{ApiError, Result};
use crate::songs::SongPreview;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: String,
    pub name: String,
    pub year: i32,
    pub cover_url: Option<String>,
}

/// Album as returned by `GET /albums/:id`, with its songs inlined.
#[derive(Debug, Clone, Serialize)]
pub struct AlbumDetail {
    #[serde(flatten)]
    pub album: Album,
    pub songs: Vec<SongPreview>,
}

#[derive(Debug, Deserialize)]
pub struct AlbumPayload {
    pub name: String,
    pub year: i32,
}

#[derive(Clone)]
pub struct AlbumDatabase {
    pool: SqlitePool,
}

impl AlbumDatabase {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add_album(&self, payload: &AlbumPayload) -> Result<String> {
        let id = generate_id("album");

        sqlx::query("INSERT INTO albums (id, name, year, cover_url) VALUES (?, ?, ?, NULL)")
            .bind(&id)
            .bind(&payload.name)
            .bind(payload.year)
            .execute(&self.pool)
            .await
            .context("Failed to insert album")?;

        tracing::debug!("Added album {} ({})", payload.name, id);
        Ok(id)
    }

    pub async fn get_album_by_id(&self, id: &str) -> Result<Album> {
        sqlx::query_as::<_, Album>("SELECT id, name, year, cover_url FROM albums WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch album")?
            .ok_or_else(|| ApiError::not_found("Album not found"))
    }

    pub async fn edit_album_by_id(&self, id: &str, payload: &AlbumPayload) -> Result<()> {
        let result = sqlx::query("UPDATE albums SET name = ?, year = ? WHERE id = ?")
            .bind(&payload.name)
            .bind(payload.year)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update album")?;

        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("Failed to update album. Id not found"));
        }

        Ok(())
    }

    /// Deleting an album cascades to its songs and likes.
    pub async fn delete_album_by_id(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM albums WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete album")?;

        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("Failed to delete album. Id not found"));
        }

        Ok(())
    }

    pub async fn add_cover_album_by_id(&self, id: &str, cover_url: &str) -> Result<()> {
        let result = sqlx::query("UPDATE albums SET cover_url = ? WHERE id = ?")
            .bind(cover_url)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update album cover")?;

        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("Failed to update cover. Album not found"));
        }

        Ok(())
    }
}
