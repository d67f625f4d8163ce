use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use crate::collaborations::CollaborationDatabase;
use crate::db::{generate_id, is_unique_violation};
use crate::error::{ApiError, Result};
use crate::songs::SongPreview;

#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    /// Owner's username
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaylistWithSongs {
    pub id: String,
    pub name: String,
    pub username: String,
    pub songs: Vec<SongPreview>,
}

#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct PlaylistActivity {
    pub username: String,
    pub title: String,
    pub action: String,
    pub time: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistActivities {
    pub playlist_id: String,
    pub activities: Vec<PlaylistActivity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityAction {
    Add,
    Delete,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::Add => "add",
            ActivityAction::Delete => "delete",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PlaylistCreate {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSongPayload {
    pub song_id: String,
}

#[derive(Clone)]
pub struct PlaylistDatabase {
    pool: SqlitePool,
    collaborations: CollaborationDatabase,
}

impl PlaylistDatabase {
    pub fn new(pool: SqlitePool, collaborations: CollaborationDatabase) -> Self {
        Self {
            pool,
            collaborations,
        }
    }

    /// Create a new playlist owned by `owner`
    pub async fn add_playlist(&self, name: &str, owner: &str) -> Result<String> {
        let id = generate_id("playlist");

        sqlx::query("INSERT INTO playlists (id, name, owner) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(name)
            .bind(owner)
            .execute(&self.pool)
            .await
            .context("Failed to insert playlist")?;

        Ok(id)
    }

    /// Playlists the user owns or collaborates on
    pub async fn get_playlists(&self, user_id: &str) -> Result<Vec<PlaylistSummary>> {
        let playlists = sqlx::query_as::<_, PlaylistSummary>(
            r#"
            SELECT playlists.id, playlists.name, users.username
            FROM playlists
            INNER JOIN users ON users.id = playlists.owner
            WHERE playlists.owner = ?
               OR playlists.id IN (SELECT playlist_id FROM collaborations WHERE user_id = ?)
            ORDER BY playlists.rowid
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch playlists")?;

        Ok(playlists)
    }

    pub async fn delete_playlist_by_id(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM playlists WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete playlist")?;

        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("Failed to delete playlist. Id not found"));
        }

        Ok(())
    }

    /// Fails with `NotFound` for an unknown playlist and `Authorization`
    /// when `owner` is not its owner.
    pub async fn verify_playlist_owner(&self, id: &str, owner: &str) -> Result<()> {
        let actual = sqlx::query_scalar::<_, String>("SELECT owner FROM playlists WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch playlist owner")?
            .ok_or_else(|| ApiError::not_found("Playlist not found"))?;

        if actual != owner {
            return Err(ApiError::authorization(
                "You are not entitled to access this resource",
            ));
        }

        Ok(())
    }

    /// Owners and collaborators pass. A non-owner without a collaboration
    /// row gets the ownership check's `Authorization` error back.
    pub async fn verify_playlist_access(&self, playlist_id: &str, user_id: &str) -> Result<()> {
        match self.verify_playlist_owner(playlist_id, user_id).await {
            Ok(()) => Ok(()),
            Err(denied @ ApiError::Authorization(_)) => {
                if self
                    .collaborations
                    .is_collaborator(playlist_id, user_id)
                    .await?
                {
                    Ok(())
                } else {
                    Err(denied)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Add a song and log the `add` activity atomically.
    pub async fn add_song_to_playlist(
        &self,
        playlist_id: &str,
        song_id: &str,
        user_id: &str,
    ) -> Result<String> {
        let id = generate_id("playlistsong");
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let result = sqlx::query("INSERT INTO playlist_songs (id, playlist_id, song_id) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(playlist_id)
            .bind(song_id)
            .execute(&mut *tx)
            .await;

        match result {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(ApiError::invariant(
                    "Failed to add song to playlist. Song is already in the playlist",
                ));
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context("Failed to add song to playlist")
                    .into());
            }
        }

        record_activity(&mut *tx, playlist_id, song_id, user_id, ActivityAction::Add).await?;
        tx.commit().await.context("Failed to commit playlist song")?;

        tracing::debug!("Song {} added to playlist {} by {}", song_id, playlist_id, user_id);
        Ok(id)
    }

    /// Remove a song and log the `delete` activity atomically.
    pub async fn delete_song_from_playlist(
        &self,
        playlist_id: &str,
        song_id: &str,
        user_id: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let result = sqlx::query("DELETE FROM playlist_songs WHERE playlist_id = ? AND song_id = ?")
            .bind(playlist_id)
            .bind(song_id)
            .execute(&mut *tx)
            .await
            .context("Failed to remove song from playlist")?;

        if result.rows_affected() == 0 {
            return Err(ApiError::invariant(
                "Failed to delete song from playlist. Song is not in the playlist",
            ));
        }

        record_activity(&mut *tx, playlist_id, song_id, user_id, ActivityAction::Delete).await?;
        tx.commit().await.context("Failed to commit playlist song removal")?;

        tracing::debug!(
            "Song {} removed from playlist {} by {}",
            song_id,
            playlist_id,
            user_id
        );
        Ok(())
    }

    /// Playlist header and its songs, read from one snapshot.
    pub async fn get_songs_in_playlist(&self, playlist_id: &str) -> Result<PlaylistWithSongs> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let (id, name, username) = sqlx::query_as::<_, (String, String, String)>(
            r#"
            SELECT playlists.id, playlists.name, users.username
            FROM playlists
            INNER JOIN users ON users.id = playlists.owner
            WHERE playlists.id = ?
            "#,
        )
        .bind(playlist_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to fetch playlist")?
        .ok_or_else(|| ApiError::not_found("Playlist not found"))?;

        let songs = sqlx::query_as::<_, SongPreview>(
            r#"
            SELECT songs.id, songs.title, songs.performer
            FROM playlist_songs
            INNER JOIN songs ON songs.id = playlist_songs.song_id
            WHERE playlist_songs.playlist_id = ?
            ORDER BY playlist_songs.rowid
            "#,
        )
        .bind(playlist_id)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to fetch playlist songs")?;

        tx.commit().await.context("Failed to close playlist read")?;

        Ok(PlaylistWithSongs {
            id,
            name,
            username,
            songs,
        })
    }

    pub async fn get_activities(&self, playlist_id: &str) -> Result<PlaylistActivities> {
        let activities = sqlx::query_as::<_, PlaylistActivity>(
            r#"
            SELECT users.username, songs.title, playlist_song_activities.action, playlist_song_activities.time
            FROM playlist_song_activities
            INNER JOIN users ON users.id = playlist_song_activities.user_id
            INNER JOIN songs ON songs.id = playlist_song_activities.song_id
            WHERE playlist_song_activities.playlist_id = ?
            ORDER BY playlist_song_activities.time, playlist_song_activities.rowid
            "#,
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch playlist activities")?;

        Ok(PlaylistActivities {
            playlist_id: playlist_id.to_string(),
            activities,
        })
    }
}

/// Append one row to the activity log.
async fn record_activity(
    conn: &mut SqliteConnection,
    playlist_id: &str,
    song_id: &str,
    user_id: &str,
    action: ActivityAction,
) -> Result<String> {
    let id = generate_id("activities");
    let time = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

    sqlx::query(
        r#"
        INSERT INTO playlist_song_activities (id, playlist_id, song_id, user_id, action, time)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(playlist_id)
    .bind(song_id)
    .bind(user_id)
    .bind(action.as_str())
    .bind(&time)
    .execute(conn)
    .await
    .context("Failed to record playlist activity")?;

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connect_in_memory, migrate};

    async fn setup() -> (SqlitePool, PlaylistDatabase, CollaborationDatabase) {
        let pool = connect_in_memory().await.unwrap();
        migrate(&pool).await.unwrap();

        for (id, username) in [("user-owner", "owner"), ("user-collab", "collab"), ("user-other", "other")] {
            sqlx::query("INSERT INTO users (id, username, password, fullname) VALUES (?, ?, 'x', ?)")
                .bind(id)
                .bind(username)
                .bind(username)
                .execute(&pool)
                .await
                .unwrap();
        }
        sqlx::query(
            "INSERT INTO songs (id, title, year, performer) VALUES ('song-1', 'Fix You', 2005, 'Coldplay'), ('song-2', 'Yellow', 2000, 'Coldplay')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let collaborations = CollaborationDatabase::new(pool.clone());
        let playlists = PlaylistDatabase::new(pool.clone(), collaborations.clone());
        (pool, playlists, collaborations)
    }

    #[tokio::test]
    async fn test_access_check_owner_collaborator_stranger() {
        let (_pool, playlists, collaborations) = setup().await;
        let id = playlists.add_playlist("Road trip", "user-owner").await.unwrap();
        collaborations.add_collaboration(&id, "user-collab").await.unwrap();

        playlists.verify_playlist_access(&id, "user-owner").await.unwrap();
        playlists.verify_playlist_access(&id, "user-collab").await.unwrap();
        assert!(matches!(
            playlists.verify_playlist_access(&id, "user-other").await,
            Err(ApiError::Authorization(_))
        ));

        // collaborators are not owners
        assert!(matches!(
            playlists.verify_playlist_owner(&id, "user-collab").await,
            Err(ApiError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn test_access_check_unknown_playlist_is_not_found() {
        let (_pool, playlists, _) = setup().await;
        assert!(matches!(
            playlists.verify_playlist_access("playlist-missing", "user-owner").await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_song_changes_are_logged() {
        let (_pool, playlists, _) = setup().await;
        let id = playlists.add_playlist("Road trip", "user-owner").await.unwrap();

        playlists.add_song_to_playlist(&id, "song-1", "user-owner").await.unwrap();
        playlists.add_song_to_playlist(&id, "song-2", "user-collab").await.unwrap();
        playlists.delete_song_from_playlist(&id, "song-1", "user-collab").await.unwrap();

        let playlist = playlists.get_songs_in_playlist(&id).await.unwrap();
        assert_eq!(playlist.username, "owner");
        assert_eq!(playlist.songs.len(), 1);
        assert_eq!(playlist.songs[0].id, "song-2");

        let log = playlists.get_activities(&id).await.unwrap();
        assert_eq!(log.playlist_id, id);
        let entries: Vec<(&str, &str, &str)> = log
            .activities
            .iter()
            .map(|a| (a.username.as_str(), a.title.as_str(), a.action.as_str()))
            .collect();
        assert_eq!(
            entries,
            vec![
                ("owner", "Fix You", "add"),
                ("collab", "Yellow", "add"),
                ("collab", "Fix You", "delete"),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_changes_leave_no_activity() {
        let (_pool, playlists, _) = setup().await;
        let id = playlists.add_playlist("Road trip", "user-owner").await.unwrap();

        playlists.add_song_to_playlist(&id, "song-1", "user-owner").await.unwrap();
        assert!(matches!(
            playlists.add_song_to_playlist(&id, "song-1", "user-owner").await,
            Err(ApiError::Invariant(_))
        ));
        assert!(matches!(
            playlists.delete_song_from_playlist(&id, "song-2", "user-owner").await,
            Err(ApiError::Invariant(_))
        ));

        assert_eq!(playlists.get_activities(&id).await.unwrap().activities.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_playlist_reads() {
        let (_pool, playlists, _) = setup().await;
        let id = playlists.add_playlist("Empty", "user-owner").await.unwrap();

        assert!(playlists.get_songs_in_playlist(&id).await.unwrap().songs.is_empty());
        assert!(playlists.get_activities(&id).await.unwrap().activities.is_empty());
    }

    #[tokio::test]
    async fn test_listing_includes_collaborations_once() {
        let (_pool, playlists, collaborations) = setup().await;
        let mine = playlists.add_playlist("Mine", "user-collab").await.unwrap();
        let shared = playlists.add_playlist("Shared", "user-owner").await.unwrap();
        playlists.add_playlist("Private", "user-owner").await.unwrap();
        collaborations.add_collaboration(&shared, "user-collab").await.unwrap();
        collaborations.add_collaboration(&shared, "user-other").await.unwrap();

        let listed = playlists.get_playlists("user-collab").await.unwrap();
        assert_eq!(
            listed,
            vec![
                PlaylistSummary {
                    id: mine,
                    name: "Mine".into(),
                    username: "collab".into(),
                },
                PlaylistSummary {
                    id: shared,
                    name: "Shared".into(),
                    username: "owner".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_deleting_playlist_cascades() {
        let (pool, playlists, collaborations) = setup().await;
        let id = playlists.add_playlist("Gone", "user-owner").await.unwrap();
        collaborations.add_collaboration(&id, "user-collab").await.unwrap();
        playlists.add_song_to_playlist(&id, "song-1", "user-owner").await.unwrap();

        playlists.delete_playlist_by_id(&id).await.unwrap();

        for table in ["playlist_songs", "playlist_song_activities", "collaborations"] {
            let count: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(*) FROM {} WHERE playlist_id = ?",
                table
            ))
            .bind(&id)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(count, 0, "{} not cleaned up", table);
        }
        assert!(matches!(
            playlists.delete_playlist_by_id(&id).await,
            Err(ApiError::NotFound(_))
        ));
    }
}
