//! Database access layer for PostgreSQL.

pub mod records;

pub use records::{MemoryRecordStore, PgRecordStore, RecordKind, RecordStore, StoredRecord};

use crate::config::DatabaseConfig;
use crate::{Error, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::Path;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let url = config.url.as_deref().ok_or_else(|| Error::Config {
        message: "DATABASE_URL environment variable not set".to_string(),
    })?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(url)
        .await?;

    Ok(pool)
}

/// Run database migrations from the migrations directory.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrator = sqlx::migrate::Migrator::new(Path::new("./migrations")).await?;
    migrator.run(pool).await?;
    Ok(())
}
