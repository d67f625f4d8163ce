use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use open_music::db::{self, MIGRATOR};
use sqlx::SqlitePool;

#[derive(Parser)]
#[command(name = "open-music-migrate")]
#[command(about = "Apply or revert OpenMusic database migrations", long_about = None)]
struct Cli {
    /// SQLite database url
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:openmusic.db")]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply every pending migration
    Up,
    /// Revert migrations newer than a version (default: only the latest)
    Down {
        /// Keep migrations up to and including this version; 0 reverts all
        #[arg(long)]
        target: Option<i64>,
    },
    /// List known migrations and whether they are applied
    Status,
}

async fn applied_versions(pool: &SqlitePool) -> Result<Vec<i64>> {
    let exists = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await
    .context("Failed to inspect schema")?;

    if exists == 0 {
        return Ok(Vec::new());
    }

    sqlx::query_scalar::<_, i64>("SELECT version FROM _sqlx_migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .context("Failed to read applied migrations")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    let pool = db::connect(&cli.database_url).await?;

    match cli.command {
        Command::Up => {
            db::migrate(&pool).await?;
        }
        Command::Down { target } => {
            let applied = applied_versions(&pool).await?;
            if applied.is_empty() {
                tracing::info!("No migrations applied, nothing to revert");
                return Ok(());
            }

            // Default: step back one migration
            let target = target.unwrap_or_else(|| {
                applied
                    .len()
                    .checked_sub(2)
                    .map(|i| applied[i])
                    .unwrap_or(0)
            });

            tracing::info!("Reverting migrations newer than {}", target);
            MIGRATOR
                .undo(&pool, target)
                .await
                .context("Failed to revert migrations")?;
            tracing::info!("Revert complete");
        }
        Command::Status => {
            let applied = applied_versions(&pool).await?;
            for migration in MIGRATOR.iter().filter(|m| m.migration_type.is_up_migration()) {
                let state = if applied.contains(&migration.version) {
                    "applied"
                } else {
                    "pending"
                };
                tracing::info!(
                    "{} {} [{}]",
                    migration.version,
                    migration.description,
                    state
                );
            }
        }
    }

    pool.close().await;
    Ok(())
}
