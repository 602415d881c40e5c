//! Data access layer: typed record gateways over PostgreSQL
//!
//! One gateway module per table. The two performance-critical paths (chunk
//! batch rewrite and the FTS rank select in [`crate::retrieval`]) stay raw
//! SQL; everything else is a thin typed query.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Config;
use crate::types::RuntimeError;

pub mod api_keys;
pub mod chat;
pub mod chunks;
pub mod dead_letters;
pub mod jobs;
pub mod models;
pub mod refresh_tokens;
pub mod repositories;
pub mod results;
pub mod share_tokens;
pub mod users;

pub use models::*;

/// Embedded schema migrations, applied with `devlens migrate`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Open a connection pool against the configured database.
pub async fn connect(config: &Config) -> Result<PgPool, RuntimeError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database.url)
        .await?;
    Ok(pool)
}

/// Apply pending migrations (or list them with `dry_run`).
pub async fn migrate(config: &Config, dry_run: bool) -> Result<(), RuntimeError> {
    let pool = connect(config).await?;
    if dry_run {
        for migration in MIGRATOR.iter() {
            tracing::info!(version = migration.version, description = %migration.description, "pending migration");
        }
        return Ok(());
    }
    MIGRATOR.run(&pool).await?;
    tracing::info!("database migrations applied");
    Ok(())
}
