//! # Storage and Persistence
//!
//! PostgreSQL connectivity, embedded migrations, and the repositories for
//! secret metadata and backend scope configuration.

pub mod memory;
pub mod migrations;
pub mod pool;
pub mod repositories;

pub use crate::config::DatabaseConfig;

pub use memory::{InMemoryScopeStore, InMemorySecretStore};
pub use migrations::{
    get_migration_version, list_applied_migrations, run_migrations as run_db_migrations,
    validate_migrations, MigrationInfo,
};
pub use pool::{create_pool, get_pool_stats, DbPool, PoolStats};
pub use repositories::{
    DeploymentClaim, DeploymentUpdate, FunctionRefChange, ScopeConfigStore, SecretRecordStore,
    SqlxScopeRepository, SqlxSecretRepository,
};

use crate::errors::{KeyturnError, Result};

/// Run database migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    migrations::run_migrations(pool).await
}

/// Check database connectivity
pub async fn check_connection(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| KeyturnError::database(e, "Database connectivity check failed"))?;
    Ok(())
}
