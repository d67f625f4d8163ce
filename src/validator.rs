//! Request payload checks. Shape errors (missing fields, wrong types) come
//! from deserialization; the functions here cover value constraints.

use async_trait::async_trait;
use axum::Json;
use axum::extract::{FromRequest, Request};
use chrono::Datelike;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;

use crate::albums::AlbumPayload;
use crate::authentications::{LoginPayload, RefreshTokenPayload};
use crate::collaborations::CollaborationPayload;
use crate::error::{ApiError, Result};
use crate::playlist::{PlaylistCreate, PlaylistSongPayload};
use crate::songs::SongPayload;
use crate::users::UserPayload;

pub const MIN_YEAR: i32 = 1900;
pub const MAX_USERNAME_LEN: usize = 50;

/// Accepted cover upload content types.
pub const IMAGE_CONTENT_TYPES: &[&str] = &[
    "image/apng",
    "image/avif",
    "image/gif",
    "image/jpeg",
    "image/png",
    "image/webp",
];

static EMAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

/// JSON body extractor that reports malformed payloads as 400 failures.
pub struct JsonPayload<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonPayload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::invariant(rejection.body_text()))?;
        Ok(Self(value))
    }
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ApiError::invariant(format!(
            "\"{}\" is not allowed to be empty",
            field
        )));
    }
    Ok(())
}

fn require_year(year: i32) -> Result<()> {
    let current = chrono::Utc::now().year();
    if year < MIN_YEAR || year > current {
        return Err(ApiError::invariant(format!(
            "\"year\" must be between {} and {}",
            MIN_YEAR, current
        )));
    }
    Ok(())
}

pub fn validate_album_payload(payload: &AlbumPayload) -> Result<()> {
    require_text("name", &payload.name)?;
    require_year(payload.year)
}

pub fn validate_song_payload(payload: &SongPayload) -> Result<()> {
    require_text("title", &payload.title)?;
    require_year(payload.year)?;
    require_text("performer", &payload.performer)?;

    if let Some(duration) = payload.duration {
        if duration < 0 {
            return Err(ApiError::invariant(
                "\"duration\" must be greater than or equal to 0",
            ));
        }
    }
    if let Some(album_id) = &payload.album_id {
        require_text("albumId", album_id)?;
    }

    Ok(())
}

pub fn validate_user_payload(payload: &UserPayload) -> Result<()> {
    require_text("username", &payload.username)?;
    if payload.username.chars().count() > MAX_USERNAME_LEN {
        return Err(ApiError::invariant(format!(
            "\"username\" length must be less than or equal to {} characters long",
            MAX_USERNAME_LEN
        )));
    }
    require_text("password", &payload.password)?;
    require_text("fullname", &payload.fullname)
}

pub fn validate_login_payload(payload: &LoginPayload) -> Result<()> {
    require_text("username", &payload.username)?;
    require_text("password", &payload.password)
}

pub fn validate_refresh_token_payload(payload: &RefreshTokenPayload) -> Result<()> {
    require_text("refreshToken", &payload.refresh_token)
}

pub fn validate_playlist_payload(payload: &PlaylistCreate) -> Result<()> {
    require_text("name", &payload.name)
}

pub fn validate_song_in_playlist_payload(payload: &PlaylistSongPayload) -> Result<()> {
    require_text("songId", &payload.song_id)
}

pub fn validate_collaboration_payload(payload: &CollaborationPayload) -> Result<()> {
    require_text("playlistId", &payload.playlist_id)?;
    require_text("userId", &payload.user_id)
}

pub fn validate_export_playlist_payload(target_email: &str) -> Result<()> {
    require_text("targetEmail", target_email)?;
    if !EMAIL_REGEX.is_match(target_email) {
        return Err(ApiError::invariant("\"targetEmail\" must be a valid email"));
    }
    Ok(())
}

/// Cover uploads must declare one of [`IMAGE_CONTENT_TYPES`].
pub fn validate_image_content_type(content_type: Option<&str>) -> Result<()> {
    match content_type {
        Some(ct) if IMAGE_CONTENT_TYPES.contains(&ct.to_ascii_lowercase().as_str()) => Ok(()),
        _ => Err(ApiError::invariant(format!(
            "\"content-type\" must be one of [{}]",
            IMAGE_CONTENT_TYPES.join(", ")
        ))),
    }
}
