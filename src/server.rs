use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, FromRef, Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::albums::{AlbumDatabase, AlbumDetail, AlbumPayload};
use crate::auth::AuthUser;
use crate::authentications::{AuthenticationDatabase, LoginPayload, RefreshTokenPayload};
use crate::cache::Cache;
use crate::collaborations::{CollaborationDatabase, CollaborationPayload};
use crate::error::{ApiError, Result};
use crate::likes::LikeDatabase;
use crate::playlist::{PlaylistCreate, PlaylistDatabase, PlaylistSongPayload};
use crate::producer::{
    EXPORT_PLAYLISTS_QUEUE, ExportPlaylistMessage, ExportPlaylistPayload, MessageProducer,
};
use crate::songs::{SongDatabase, SongPayload, SongQuery};
use crate::storage::StorageService;
use crate::tokenize::TokenManager;
use crate::users::{UserDatabase, UserPayload};
use crate::validator::{self, JsonPayload};

/// Largest accepted cover upload request body.
pub const MAX_COVER_BYTES: usize = 512_000;

const DATA_SOURCE_HEADER: &str = "x-data-source";

#[derive(Clone)]
pub struct AppState {
    pub albums: AlbumDatabase,
    pub songs: SongDatabase,
    pub users: UserDatabase,
    pub authentications: AuthenticationDatabase,
    pub playlists: PlaylistDatabase,
    pub collaborations: CollaborationDatabase,
    pub likes: LikeDatabase,
    pub tokens: Arc<TokenManager>,
    pub producer: Arc<dyn MessageProducer>,
    pub storage: StorageService,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        tokens: TokenManager,
        cache: Arc<dyn Cache>,
        producer: Arc<dyn MessageProducer>,
        storage: StorageService,
    ) -> Self {
        let collaborations = CollaborationDatabase::new(pool.clone());

        Self {
            albums: AlbumDatabase::new(pool.clone()),
            songs: SongDatabase::new(pool.clone()),
            users: UserDatabase::new(pool.clone()),
            authentications: AuthenticationDatabase::new(pool.clone()),
            playlists: PlaylistDatabase::new(pool.clone(), collaborations.clone()),
            collaborations,
            likes: LikeDatabase::new(pool, cache),
            tokens: Arc::new(tokens),
            producer,
            storage,
        }
    }
}

impl FromRef<AppState> for Arc<TokenManager> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

pub fn create_router(state: AppState) -> Router {
    // Uploaded covers are served straight from the storage folder
    let uploads_service = ServeDir::new(state.storage.folder());

    Router::new()
        .route("/", get(root))
        .route("/albums", post(add_album))
        .route(
            "/albums/:id",
            get(get_album).put(edit_album).delete(delete_album),
        )
        .route(
            "/albums/:id/covers",
            post(upload_album_cover).layer(DefaultBodyLimit::max(MAX_COVER_BYTES)),
        )
        .route(
            "/albums/:id/likes",
            get(get_album_likes)
                .post(toggle_album_like)
                .delete(delete_album_like),
        )
        .route("/songs", get(list_songs).post(add_song))
        .route(
            "/songs/:id",
            get(get_song).put(edit_song).delete(delete_song),
        )
        .route("/users", post(add_user))
        .route("/users/:id", get(get_user))
        .route(
            "/authentications",
            post(login).put(refresh_access_token).delete(logout),
        )
        .route("/playlists", get(list_playlists).post(add_playlist))
        .route("/playlists/:id", axum::routing::delete(delete_playlist))
        .route(
            "/playlists/:id/songs",
            get(get_playlist_songs)
                .post(add_song_to_playlist)
                .delete(delete_song_from_playlist),
        )
        .route("/playlists/:id/activities", get(get_playlist_activities))
        .route(
            "/collaborations",
            post(add_collaboration).delete(delete_collaboration),
        )
        .route("/export/playlists/:id", post(export_playlist))
        .nest_service("/uploads/images", uploads_service)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Resolves once the process receives Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

fn success(data: serde_json::Value) -> Json<serde_json::Value> {
    Json(json!({ "status": "success", "data": data }))
}

fn success_message(message: &str) -> Json<serde_json::Value> {
    Json(json!({ "status": "success", "message": message }))
}

/// Root endpoint
async fn root() -> String {
    format!("OpenMusic API v{}", env!("CARGO_PKG_VERSION"))
}

// ========== ALBUM ENDPOINTS ==========

async fn add_album(
    State(state): State<AppState>,
    JsonPayload(payload): JsonPayload<AlbumPayload>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Adding album: {}", payload.name);
    validator::validate_album_payload(&payload)?;

    let album_id = state.albums.add_album(&payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "message": "Album added",
            "data": { "albumId": album_id },
        })),
    ))
}

async fn get_album(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Fetching album with id: {}", id);

    let album = state.albums.get_album_by_id(&id).await?;
    let songs = state.songs.get_songs_by_album_id(&id).await?;
    tracing::debug!("Album {} has {} songs", id, songs.len());

    let detail = AlbumDetail { album, songs };
    Ok(success(json!({ "album": detail })))
}

async fn edit_album(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonPayload(payload): JsonPayload<AlbumPayload>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Updating album: {}", id);
    validator::validate_album_payload(&payload)?;

    state.albums.edit_album_by_id(&id, &payload).await?;
    Ok(success_message("Album updated"))
}

async fn delete_album(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Deleting album: {}", id);

    state.albums.delete_album_by_id(&id).await?;
    Ok(success_message("Album deleted"))
}

async fn upload_album_cover(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    tracing::debug!("Uploading cover for album: {}", id);

    // Unknown albums are rejected before the upload is read
    state.albums.get_album_by_id(&id).await?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("cover") {
            continue;
        }

        validator::validate_image_content_type(field.content_type())?;
        let original_name = field.file_name().unwrap_or("cover").to_string();
        let data = field.bytes().await?;

        let filename = state.storage.write_file(&original_name, &data).await?;
        let cover_url = state.storage.file_url(&filename);
        state.albums.add_cover_album_by_id(&id, &cover_url).await?;

        tracing::debug!("Cover for album {} stored at {}", id, cover_url);
        return Ok((
            StatusCode::CREATED,
            success_message("Cover uploaded successfully"),
        ));
    }

    tracing::warn!("No cover field found in upload for album: {}", id);
    Err(ApiError::invariant("\"cover\" is required"))
}

async fn toggle_album_like(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Toggling like on album {} for user {}", id, user_id);
    state.albums.get_album_by_id(&id).await?;

    let liked = state.likes.toggle_album_like(&id, &user_id).await?;
    let message = if liked {
        "Album liked"
    } else {
        "Album unliked"
    };

    Ok((StatusCode::CREATED, success_message(message)))
}

async fn delete_album_like(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Removing like on album {} for user {}", id, user_id);
    state.albums.get_album_by_id(&id).await?;

    state.likes.delete_album_like(&id, &user_id).await?;
    Ok(success_message("Album unliked"))
}

async fn get_album_likes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    tracing::debug!("Fetching likes for album: {}", id);
    state.albums.get_album_by_id(&id).await?;

    let likes = state.likes.get_album_likes(&id).await?;
    let mut response = success(json!({ "likes": likes.likes })).into_response();

    if likes.from_cache {
        tracing::debug!("Likes for album {} served from cache", id);
        response
            .headers_mut()
            .insert(DATA_SOURCE_HEADER, HeaderValue::from_static("cache"));
    }

    Ok(response)
}

// ========== SONG ENDPOINTS ==========

async fn add_song(
    State(state): State<AppState>,
    JsonPayload(payload): JsonPayload<SongPayload>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Adding song: {}", payload.title);
    validator::validate_song_payload(&payload)?;

    let song_id = state.songs.add_song(&payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "message": "Song added",
            "data": { "songId": song_id },
        })),
    ))
}

async fn list_songs(
    State(state): State<AppState>,
    Query(query): Query<SongQuery>,
) -> Result<impl IntoResponse> {
    tracing::debug!(
        "Searching songs (title: {:?}, performer: {:?})",
        query.title,
        query.performer
    );

    let songs = state.songs.get_songs(&query).await?;
    tracing::debug!("Returning {} songs", songs.len());

    Ok(success(json!({ "songs": songs })))
}

async fn get_song(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Fetching song with id: {}", id);

    let song = state.songs.get_song_by_id(&id).await?;
    Ok(success(json!({ "song": song })))
}

async fn edit_song(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonPayload(payload): JsonPayload<SongPayload>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Updating song: {}", id);
    validator::validate_song_payload(&payload)?;

    state.songs.edit_song_by_id(&id, &payload).await?;
    Ok(success_message("Song updated"))
}

async fn delete_song(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Deleting song: {}", id);

    state.songs.delete_song_by_id(&id).await?;
    Ok(success_message("Song deleted"))
}

// ========== USER ENDPOINTS ==========

async fn add_user(
    State(state): State<AppState>,
    JsonPayload(payload): JsonPayload<UserPayload>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Registering user: {}", payload.username);
    validator::validate_user_payload(&payload)?;

    let user_id = state.users.add_user(&payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "message": "User added",
            "data": { "userId": user_id },
        })),
    ))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Fetching user with id: {}", id);

    let user = state.users.get_user_by_id(&id).await?;
    Ok(success(json!({ "user": user })))
}

// ========== AUTHENTICATION ENDPOINTS ==========

async fn login(
    State(state): State<AppState>,
    JsonPayload(payload): JsonPayload<LoginPayload>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Login attempt for: {}", payload.username);
    validator::validate_login_payload(&payload)?;

    let user_id = state
        .users
        .verify_user_credential(&payload.username, &payload.password)
        .await?;

    let access_token = state.tokens.generate_access_token(&user_id)?;
    let refresh_token = state.tokens.generate_refresh_token(&user_id)?;
    state
        .authentications
        .add_refresh_token(&refresh_token)
        .await?;

    tracing::debug!("User {} logged in", user_id);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "message": "Authentication added",
            "data": {
                "accessToken": access_token,
                "refreshToken": refresh_token,
            },
        })),
    ))
}

async fn refresh_access_token(
    State(state): State<AppState>,
    JsonPayload(payload): JsonPayload<RefreshTokenPayload>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Refreshing access token");
    validator::validate_refresh_token_payload(&payload)?;

    state
        .authentications
        .verify_refresh_token(&payload.refresh_token)
        .await?;
    let user_id = state.tokens.verify_refresh_token(&payload.refresh_token)?;
    let access_token = state.tokens.generate_access_token(&user_id)?;

    Ok(Json(json!({
        "status": "success",
        "message": "Access token refreshed",
        "data": { "accessToken": access_token },
    })))
}

async fn logout(
    State(state): State<AppState>,
    JsonPayload(payload): JsonPayload<RefreshTokenPayload>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Deleting refresh token");
    validator::validate_refresh_token_payload(&payload)?;

    state
        .authentications
        .delete_refresh_token(&payload.refresh_token)
        .await?;
    Ok(success_message("Refresh token deleted"))
}

// ========== PLAYLIST ENDPOINTS ==========

async fn add_playlist(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    JsonPayload(payload): JsonPayload<PlaylistCreate>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Creating playlist {} for user {}", payload.name, user_id);
    validator::validate_playlist_payload(&payload)?;

    let playlist_id = state.playlists.add_playlist(&payload.name, &user_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "message": "Playlist added",
            "data": { "playlistId": playlist_id },
        })),
    ))
}

async fn list_playlists(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse> {
    tracing::debug!("Fetching playlists for user: {}", user_id);

    let playlists = state.playlists.get_playlists(&user_id).await?;
    tracing::debug!("Returning {} playlists", playlists.len());

    Ok(success(json!({ "playlists": playlists })))
}

async fn delete_playlist(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Deleting playlist {} for user {}", id, user_id);

    state.playlists.verify_playlist_owner(&id, &user_id).await?;
    state.playlists.delete_playlist_by_id(&id).await?;

    Ok(success_message("Playlist deleted"))
}

async fn add_song_to_playlist(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    JsonPayload(payload): JsonPayload<PlaylistSongPayload>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Adding song {} to playlist {}", payload.song_id, id);
    validator::validate_song_in_playlist_payload(&payload)?;

    state.playlists.verify_playlist_access(&id, &user_id).await?;
    state.songs.get_song_by_id(&payload.song_id).await?;

    let playlist_song_id = state
        .playlists
        .add_song_to_playlist(&id, &payload.song_id, &user_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "message": "Song added to playlist",
            "data": { "playlistSongId": playlist_song_id },
        })),
    ))
}

async fn get_playlist_songs(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Fetching songs of playlist {} for user {}", id, user_id);

    state.playlists.verify_playlist_access(&id, &user_id).await?;
    let playlist = state.playlists.get_songs_in_playlist(&id).await?;

    Ok(success(json!({ "playlist": playlist })))
}

async fn delete_song_from_playlist(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    JsonPayload(payload): JsonPayload<PlaylistSongPayload>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Removing song {} from playlist {}", payload.song_id, id);
    validator::validate_song_in_playlist_payload(&payload)?;

    state.playlists.verify_playlist_access(&id, &user_id).await?;
    state
        .playlists
        .delete_song_from_playlist(&id, &payload.song_id, &user_id)
        .await?;

    Ok(success_message("Song removed from playlist"))
}

async fn get_playlist_activities(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Fetching activities of playlist {}", id);

    state.playlists.verify_playlist_access(&id, &user_id).await?;
    let activities = state.playlists.get_activities(&id).await?;

    Ok(success(json!(activities)))
}

// ========== COLLABORATION ENDPOINTS ==========

async fn add_collaboration(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    JsonPayload(payload): JsonPayload<CollaborationPayload>,
) -> Result<impl IntoResponse> {
    tracing::debug!(
        "Adding collaborator {} to playlist {}",
        payload.user_id,
        payload.playlist_id
    );
    validator::validate_collaboration_payload(&payload)?;

    state
        .playlists
        .verify_playlist_owner(&payload.playlist_id, &user_id)
        .await?;
    state.users.get_user_by_id(&payload.user_id).await?;

    let collaboration_id = state
        .collaborations
        .add_collaboration(&payload.playlist_id, &payload.user_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "message": "Collaboration added",
            "data": { "collaborationId": collaboration_id },
        })),
    ))
}

async fn delete_collaboration(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    JsonPayload(payload): JsonPayload<CollaborationPayload>,
) -> Result<impl IntoResponse> {
    tracing::debug!(
        "Removing collaborator {} from playlist {}",
        payload.user_id,
        payload.playlist_id
    );
    validator::validate_collaboration_payload(&payload)?;

    state
        .playlists
        .verify_playlist_owner(&payload.playlist_id, &user_id)
        .await?;
    state
        .collaborations
        .delete_collaboration(&payload.playlist_id, &payload.user_id)
        .await?;

    Ok(success_message("Collaboration deleted"))
}

// ========== EXPORT ENDPOINTS ==========

async fn export_playlist(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(playlist_id): Path<String>,
    JsonPayload(payload): JsonPayload<ExportPlaylistPayload>,
) -> Result<impl IntoResponse> {
    tracing::debug!("Export of playlist {} requested by {}", playlist_id, user_id);
    validator::validate_export_playlist_payload(&payload.target_email)?;

    state
        .playlists
        .verify_playlist_access(&playlist_id, &user_id)
        .await?;

    let message = ExportPlaylistMessage {
        playlist_id,
        user_id,
        target_email: payload.target_email,
    };
    let body = serde_json::to_string(&message).map_err(anyhow::Error::from)?;
    state
        .producer
        .send_message(EXPORT_PLAYLISTS_QUEUE, &body)
        .await?;

    tracing::info!("Queued export of playlist {}", message.playlist_id);
    Ok((
        StatusCode::CREATED,
        success_message("Your request is being queued"),
    ))
}
