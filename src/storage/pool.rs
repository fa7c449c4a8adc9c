//! # Database Connection Pool Management

use crate::config::DatabaseConfig;
use crate::errors::{KeyturnError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};

/// Type alias for the database connection pool
pub type DbPool = PgPool;

/// Create a database connection pool with the specified configuration
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool> {
    validate_config(config)?;

    let mut pool_options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout())
        .test_before_acquire(true);

    if let Some(idle_timeout) = config.idle_timeout() {
        pool_options = pool_options.idle_timeout(idle_timeout);
    }

    let pool = pool_options.connect(&config.url).await.map_err(|e| {
        tracing::error!(error = %e, url = %sanitize_url(&config.url), "Failed to create database pool");
        KeyturnError::database(
            e,
            format!("Failed to connect to database: {}", sanitize_url(&config.url)),
        )
    })?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        connect_timeout_ms = config.connect_timeout().as_millis(),
        idle_timeout_ms = config.idle_timeout().map(|d| d.as_millis()),
        "Database connection pool created"
    );

    if config.auto_migrate {
        tracing::info!("Auto-migration enabled, running database migrations");
        crate::storage::migrations::run_migrations(&pool).await?;
    }

    Ok(pool)
}

fn validate_config(config: &DatabaseConfig) -> Result<()> {
    if config.max_connections == 0 {
        return Err(KeyturnError::validation("max_connections must be greater than 0"));
    }
    if config.min_connections > config.max_connections {
        return Err(KeyturnError::validation(
            "min_connections cannot be greater than max_connections",
        ));
    }
    if !config.url.starts_with("postgres://") && !config.url.starts_with("postgresql://") {
        return Err(KeyturnError::validation(
            "database URL must start with 'postgres://' or 'postgresql://'",
        ));
    }
    Ok(())
}

/// Hide credentials in a connection URL before logging it
pub fn sanitize_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.rsplit_once('@') {
        Some((_, host)) => format!("{}://***:***@{}", scheme, host),
        None => url.to_string(),
    }
}

/// Pool statistics for monitoring
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
}

impl PoolStats {
    pub fn active(&self) -> u32 {
        self.size.saturating_sub(self.idle as u32)
    }
}

pub fn get_pool_stats(pool: &sqlx::Pool<Postgres>) -> PoolStats {
    PoolStats { size: pool.size(), idle: pool.num_idle() }
}
