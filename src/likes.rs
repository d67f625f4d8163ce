use anyhow::Context;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::db::{generate_id, is_unique_violation};
use crate::error::{ApiError, Result};

const LIKES_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

fn likes_cache_key(album_id: &str) -> String {
    format!("likes:{}", album_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlbumLikes {
    pub likes: i64,
    /// Whether the count came from the cache rather than the database
    pub from_cache: bool,
}

#[derive(Clone)]
pub struct LikeDatabase {
    pool: SqlitePool,
    cache: Arc<dyn Cache>,
}

impl LikeDatabase {
    pub fn new(pool: SqlitePool, cache: Arc<dyn Cache>) -> Self {
        Self { pool, cache }
    }

    pub async fn has_liked(&self, album_id: &str, user_id: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM user_album_likes WHERE album_id = ? AND user_id = ?",
        )
        .bind(album_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check album like")?;

        Ok(count > 0)
    }

    pub async fn add_album_like(&self, album_id: &str, user_id: &str) -> Result<()> {
        if !self.insert_like(album_id, user_id).await? {
            return Err(ApiError::invariant("You have already liked this album"));
        }
        Ok(())
    }

    pub async fn delete_album_like(&self, album_id: &str, user_id: &str) -> Result<()> {
        if !self.remove_like(album_id, user_id).await? {
            return Err(ApiError::not_found("Failed to remove like. Like not found"));
        }
        Ok(())
    }

    /// Flip the user's like on an album; returns `true` when the album is now liked.
    ///
    /// A concurrent toggle may land between the check and the write; losing
    /// that race still leaves the like in the state this call aimed for.
    pub async fn toggle_album_like(&self, album_id: &str, user_id: &str) -> Result<bool> {
        if self.has_liked(album_id, user_id).await? {
            self.remove_like(album_id, user_id).await?;
            Ok(false)
        } else {
            self.insert_like(album_id, user_id).await?;
            Ok(true)
        }
    }

    /// Returns `false` when the like already existed.
    async fn insert_like(&self, album_id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO user_album_likes (id, user_id, album_id) VALUES (?, ?, ?)",
        )
        .bind(generate_id("like"))
        .bind(user_id)
        .bind(album_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                self.invalidate(album_id).await;
                Ok(true)
            }
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to add like").into()),
        }
    }

    /// Returns `false` when there was no like to remove.
    async fn remove_like(&self, album_id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_album_likes WHERE album_id = ? AND user_id = ?")
            .bind(album_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete like")?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        self.invalidate(album_id).await;
        Ok(true)
    }

    /// Like count, served from the cache while it is warm.
    pub async fn get_album_likes(&self, album_id: &str) -> Result<AlbumLikes> {
        let key = likes_cache_key(album_id);

        match self.cache.get(&key).await {
            Ok(Some(cached)) => match cached.parse::<i64>() {
                Ok(likes) => {
                    return Ok(AlbumLikes {
                        likes,
                        from_cache: true,
                    });
                }
                Err(_) => tracing::warn!("Ignoring malformed cached like count for {}", album_id),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!("Likes cache unavailable: {:#}", e),
        }

        let likes = self.count_likes(album_id).await?;

        if let Err(e) = self.cache.set(&key, &likes.to_string(), LIKES_CACHE_TTL).await {
            tracing::warn!("Failed to cache like count for {}: {:#}", album_id, e);
        } else if self.count_likes(album_id).await? != likes {
            // A like changed after the count was taken and its eviction may
            // have run before our write, so the cached value can be stale.
            self.invalidate(album_id).await;
        }

        Ok(AlbumLikes {
            likes,
            from_cache: false,
        })
    }

    async fn count_likes(&self, album_id: &str) -> Result<i64> {
        let likes = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM user_album_likes WHERE album_id = ?",
        )
        .bind(album_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count album likes")?;

        Ok(likes)
    }

    async fn invalidate(&self, album_id: &str) {
        if let Err(e) = self.cache.delete(&likes_cache_key(album_id)).await {
            tracing::warn!("Failed to evict like count for {}: {:#}", album_id, e);
        }
    }
}
