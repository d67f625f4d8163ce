use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use open_music::cache::{Cache, MemoryCache, RedisCache, connect_redis};
use open_music::config::Config;
use open_music::db;
use open_music::producer::{MessageProducer, RedisProducer, UnavailableProducer};
use open_music::server::{self, AppState};
use open_music::storage::StorageService;
use open_music::tokenize::TokenManager;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("open_music=debug,tower_http=debug")),
        )
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let config = Config::parse();

    tracing::info!("Starting OpenMusic API");
    tracing::info!("Database: {}", config.database_url);

    let pool = db::connect(&config.database_url).await?;
    db::migrate(&pool).await?;

    let (cache, producer): (Arc<dyn Cache>, Arc<dyn MessageProducer>) = match &config.redis_url {
        Some(url) => {
            let connection = connect_redis(url).await?;
            tracing::info!("Using Redis at {} for cache and export queue", url);
            (
                Arc::new(RedisCache::new(connection.clone())),
                Arc::new(RedisProducer::new(connection)),
            )
        }
        None => {
            tracing::warn!("REDIS_URL not set; using in-process cache, playlist exports are disabled");
            (Arc::new(MemoryCache::new()), Arc::new(UnavailableProducer))
        }
    };

    let storage = StorageService::new(config.uploads_dir.clone(), &config.public_base_url())
        .await
        .context("Failed to prepare uploads directory")?;
    tracing::info!("Uploads directory: {}", storage.folder().display());

    let tokens = TokenManager::new(
        &config.access_token_key,
        &config.refresh_token_key,
        config.access_token_age,
    );

    let app = server::create_router(AppState::new(pool, tokens, cache, producer, storage));
    let addr = config.bind_address();

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  GET  /                      - API info");
    tracing::info!("  *    /albums[/:id]          - Album catalog");
    tracing::info!("  POST /albums/:id/covers     - Upload album cover");
    tracing::info!("  *    /albums/:id/likes      - Album likes");
    tracing::info!("  *    /songs[/:id]           - Song catalog");
    tracing::info!("  *    /users, /authentications - Accounts and tokens");
    tracing::info!("  *    /playlists[/:id/...]   - Playlists, songs and activities");
    tracing::info!("  *    /collaborations        - Playlist collaborators");
    tracing::info!("  POST /export/playlists/:id  - Queue a playlist export");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(server::shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}
