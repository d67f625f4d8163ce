use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::db::{generate_id, is_foreign_key_violation};
use crate::error::{ApiError, Result};

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub id: String,
    pub title: String,
    pub year: i32,
    pub performer: String,
    pub duration: Option<i32>,
    pub album_id: Option<String>,
}

/// Short form used in listings, album details and playlists.
#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct SongPreview {
    pub id: String,
    pub title: String,
    pub performer: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongPayload {
    pub title: String,
    pub year: i32,
    pub performer: String,
    pub duration: Option<i32>,
    pub album_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SongQuery {
    pub title: Option<String>,
    pub performer: Option<String>,
}

#[derive(Clone)]
pub struct SongDatabase {
    pool: SqlitePool,
}

impl SongDatabase {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add_song(&self, payload: &SongPayload) -> Result<String> {
        let id = generate_id("song");

        let result = sqlx::query(
            r#"
            INSERT INTO songs (id, title, year, performer, duration, album_id)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&payload.title)
        .bind(payload.year)
        .bind(&payload.performer)
        .bind(payload.duration)
        .bind(&payload.album_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(id),
            Err(e) if is_foreign_key_violation(&e) => {
                Err(ApiError::not_found("Failed to add song. Album not found"))
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to insert song").into()),
        }
    }

    /// List songs, optionally filtered by case-insensitive title/performer substrings.
    /// SQLite's `LOWER()` folds ASCII only and `LIKE` treats `%` and `_` as
    /// wildcards, so filtering runs on the fetched rows.
    pub async fn get_songs(&self, query: &SongQuery) -> Result<Vec<SongPreview>> {
        let title = normalized_needle(query.title.as_deref());
        let performer = normalized_needle(query.performer.as_deref());

        let songs = sqlx::query_as::<_, SongPreview>(
            "SELECT id, title, performer FROM songs ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch songs")?;

        Ok(songs
            .into_iter()
            .filter(|song| {
                contains_folded(&song.title, title.as_deref())
                    && contains_folded(&song.performer, performer.as_deref())
            })
            .collect())
    }

    pub async fn get_song_by_id(&self, id: &str) -> Result<Song> {
        sqlx::query_as::<_, Song>(
            r#"
            SELECT id, title, year, performer, duration, album_id
            FROM songs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch song")?
        .ok_or_else(|| ApiError::not_found("Song not found"))
    }

    pub async fn get_songs_by_album_id(&self, album_id: &str) -> Result<Vec<SongPreview>> {
        let songs = sqlx::query_as::<_, SongPreview>(
            "SELECT id, title, performer FROM songs WHERE album_id = ? ORDER BY rowid",
        )
        .bind(album_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch album songs")?;

        Ok(songs)
    }

    pub async fn edit_song_by_id(&self, id: &str, payload: &SongPayload) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE songs
            SET title = ?, year = ?, performer = ?, duration = ?, album_id = ?
            WHERE id = ?
            "#,
        )
        .bind(&payload.title)
        .bind(payload.year)
        .bind(&payload.performer)
        .bind(payload.duration)
        .bind(&payload.album_id)
        .bind(id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(ApiError::not_found(
                "Failed to update song. Id not found",
            )),
            Ok(_) => Ok(()),
            Err(e) if is_foreign_key_violation(&e) => {
                Err(ApiError::not_found("Failed to update song. Album not found"))
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to update song").into()),
        }
    }

    pub async fn delete_song_by_id(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM songs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete song")?;

        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("Failed to delete song. Id not found"));
        }

        Ok(())
    }
}

fn normalized_needle(value: Option<&str>) -> Option<String> {
    value
        .filter(|needle| !needle.is_empty())
        .map(str::to_lowercase)
}

fn contains_folded(haystack: &str, needle: Option<&str>) -> bool {
    match needle {
        Some(needle) => haystack.to_lowercase().contains(needle),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connect_in_memory, migrate};

    async fn setup() -> SongDatabase {
        let pool = connect_in_memory().await.unwrap();
        migrate(&pool).await.unwrap();
        SongDatabase::new(pool)
    }

    fn payload(title: &str, performer: &str) -> SongPayload {
        SongPayload {
            title: title.into(),
            year: 1960,
            performer: performer.into(),
            duration: None,
            album_id: None,
        }
    }

    fn query(title: &str) -> SongQuery {
        SongQuery {
            title: Some(title.into()),
            performer: None,
        }
    }

    #[tokio::test]
    async fn test_search_folds_non_ascii_case() {
        let songs = setup().await;
        let edith = songs.add_song(&payload("Édith", "Piaf")).await.unwrap();
        songs.add_song(&payload("Plain", "Nobody")).await.unwrap();

        for needle in ["É", "é", "ÉDITH"] {
            let found = songs.get_songs(&query(needle)).await.unwrap();
            assert_eq!(found.len(), 1, "needle {}", needle);
            assert_eq!(found[0].id, edith);
        }
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let songs = setup().await;
        let pure = songs.add_song(&payload("100% Pure", "Someone")).await.unwrap();
        songs.add_song(&payload("Édith", "Piaf")).await.unwrap();
        songs.add_song(&payload("Plain", "Nobody")).await.unwrap();

        let found = songs.get_songs(&query("%")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, pure);

        assert!(songs.get_songs(&query("_")).await.unwrap().is_empty());
        assert_eq!(songs.get_songs(&SongQuery::default()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_title_and_performer_filters_combine() {
        let songs = setup().await;
        songs.add_song(&payload("Yellow", "Coldplay")).await.unwrap();
        songs.add_song(&payload("Yellow Submarine", "The Beatles")).await.unwrap();

        let found = songs
            .get_songs(&SongQuery {
                title: Some("yellow".into()),
                performer: Some("BEATLES".into()),
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Yellow Submarine");
    }

    #[tokio::test]
    async fn test_unknown_album_and_missing_song() {
        let songs = setup().await;
        let mut orphan = payload("Orphan", "Nobody");
        orphan.album_id = Some("album-missing".into());
        assert!(matches!(songs.add_song(&orphan).await, Err(ApiError::NotFound(_))));

        assert!(matches!(
            songs.edit_song_by_id("song-missing", &payload("X", "Y")).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            songs.delete_song_by_id("song-missing").await,
            Err(ApiError::NotFound(_))
        ));
    }
}
