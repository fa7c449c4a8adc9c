//! # Database Migration Management
//!
//! SQL migrations under `migrations/` are embedded into the binary and applied
//! on startup when `auto_migrate` is enabled, or explicitly with
//! `keyturn migrate`.

use crate::errors::{KeyturnError, Result};
use crate::storage::DbPool;
use serde::{Deserialize, Serialize};
use sqlx::migrate::Migrator;
use sqlx::Row;
use tracing::{error, info};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// An applied migration as recorded by sqlx
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationInfo {
    pub version: i64,
    pub description: String,
    pub installed_on: chrono::DateTime<chrono::Utc>,
    pub execution_time: i64,
}

/// Run all pending database migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    info!(available = MIGRATOR.iter().count(), "Starting database migration process");

    MIGRATOR.run(pool).await.map_err(|e| {
        error!(error = %e, "Migration failed");
        KeyturnError::database(sqlx::Error::from(e), "Failed to apply database migrations")
    })?;

    info!("Database migrations completed");
    Ok(())
}

/// Highest applied migration version, if any
pub async fn get_migration_version(pool: &DbPool) -> Result<Option<i64>> {
    sqlx::query_scalar::<_, Option<i64>>(
        "SELECT MAX(version) FROM _sqlx_migrations WHERE success = TRUE",
    )
    .fetch_one(pool)
    .await
    .map_err(|e| KeyturnError::database(e, "Failed to read migration version"))
}

pub async fn list_applied_migrations(pool: &DbPool) -> Result<Vec<MigrationInfo>> {
    let rows = sqlx::query(
        "SELECT version, description, installed_on, execution_time \
         FROM _sqlx_migrations WHERE success = TRUE ORDER BY version",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| KeyturnError::database(e, "Failed to list applied migrations"))?;

    Ok(rows
        .into_iter()
        .map(|row| MigrationInfo {
            version: row.get("version"),
            description: row.get("description"),
            installed_on: row.get("installed_on"),
            execution_time: row.get("execution_time"),
        })
        .collect())
}

/// Whether every embedded migration has been applied
pub async fn validate_migrations(pool: &DbPool) -> Result<bool> {
    let applied: Vec<i64> =
        list_applied_migrations(pool).await?.into_iter().map(|m| m.version).collect();
    let pending: Vec<i64> = MIGRATOR
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .map(|m| m.version)
        .filter(|v| !applied.contains(v))
        .collect();

    if !pending.is_empty() {
        tracing::warn!(?pending, "Database has pending migrations");
    }
    Ok(pending.is_empty())
}
