// SQLite connection pool + embedded migrations, mirroring the teacher's
// `RuntimeConfig::load`-at-startup pattern but for schema rather than config.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

pub type DbPool = SqlitePool;

/// Open (creating if necessary) the SQLite database at `database_url` and
/// run embedded migrations. Called once at startup before any subsystem is
/// constructed.
pub async fn connect(database_url: &str) -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid database url: {database_url}"))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database at {database_url}"))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;

    info!(database_url, "database connected and migrated");
    Ok(pool)
}
