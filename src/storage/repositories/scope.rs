//! Backend scope repository
//!
//! One row per scope. The vault secret access key is sealed at rest and only
//! opened when a [`BackendScopeConfig`] is loaded.

use crate::domain::{BackendScopeConfig, DeploymentStatus, ScopeId, VaultCredentials};
use crate::errors::{KeyturnError, Result};
use crate::services::{SealedValue, SecretEncryption};
use crate::storage::DbPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::sync::Arc;
use tracing::instrument;

/// What a deployment transition does to the rotation function reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionRefChange {
    Keep,
    Set(String),
    Clear,
}

/// Status write for a deployment transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentUpdate {
    pub status: DeploymentStatus,
    pub message: Option<String>,
    pub rotation_function_ref: FunctionRefChange,
}

impl DeploymentUpdate {
    pub fn status(status: DeploymentStatus) -> Self {
        Self { status, message: None, rotation_function_ref: FunctionRefChange::Keep }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_function_ref(mut self, change: FunctionRefChange) -> Self {
        self.rotation_function_ref = change;
        self
    }
}

/// Persistence of per-scope backend configuration
#[async_trait]
pub trait ScopeConfigStore: Send + Sync {
    async fn get(&self, scope_id: &ScopeId) -> Result<Option<BackendScopeConfig>>;

    /// Create or replace credentials, region and rotation function. Deployment
    /// status is preserved for existing scopes.
    async fn upsert(&self, config: &BackendScopeConfig) -> Result<BackendScopeConfig>;

    /// Write status, message and function reference in one statement
    async fn record_deployment(&self, scope_id: &ScopeId, update: DeploymentUpdate) -> Result<()>;

    /// Move the scope to `next` only if its status and `updated_at` still
    /// match what the caller read. Returns false when another writer got there
    /// first.
    async fn claim_deployment(
        &self,
        scope_id: &ScopeId,
        expected: DeploymentClaim,
        next: DeploymentStatus,
    ) -> Result<bool>;
}

/// Status and timestamp a [`ScopeConfigStore::claim_deployment`] call expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentClaim {
    pub status: DeploymentStatus,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentClaim {
    pub fn of(scope: &BackendScopeConfig) -> Self {
        Self { status: scope.deployment_status, updated_at: scope.updated_at }
    }
}

#[derive(Debug, Clone, FromRow)]
struct ScopeRow {
    pub scope_id: String,
    pub access_key_id: Option<String>,
    pub secret_access_key_ciphertext: Option<Vec<u8>>,
    pub secret_access_key_nonce: Option<Vec<u8>>,
    pub encryption_key_version: Option<String>,
    pub default_region: String,
    pub rotation_function_ref: Option<String>,
    pub deployment_status: String,
    pub deployment_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// PostgreSQL implementation of [`ScopeConfigStore`]
#[derive(Debug, Clone)]
pub struct SqlxScopeRepository {
    pool: DbPool,
    encryption: Arc<SecretEncryption>,
}

impl SqlxScopeRepository {
    pub fn new(pool: DbPool, encryption: Arc<SecretEncryption>) -> Self {
        Self { pool, encryption }
    }

    fn from_row(&self, row: ScopeRow) -> Result<BackendScopeConfig> {
        let deployment_status =
            row.deployment_status.parse::<DeploymentStatus>().map_err(KeyturnError::internal)?;

        let credentials = match (
            row.access_key_id,
            row.secret_access_key_ciphertext,
            row.secret_access_key_nonce,
            row.encryption_key_version,
        ) {
            (Some(access_key_id), Some(ciphertext), Some(nonce), Some(key_version)) => {
                let secret = self.encryption.open_string(&SealedValue {
                    ciphertext,
                    nonce,
                    key_version,
                })?;
                Some(VaultCredentials::new(access_key_id, secret))
            }
            _ => None,
        };

        Ok(BackendScopeConfig {
            scope_id: ScopeId::from_string(row.scope_id),
            credentials,
            default_region: row.default_region,
            rotation_function_ref: row.rotation_function_ref,
            deployment_status,
            deployment_message: row.deployment_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl ScopeConfigStore for SqlxScopeRepository {
    #[instrument(skip(self), fields(scope_id = %scope_id), name = "db_get_scope")]
    async fn get(&self, scope_id: &ScopeId) -> Result<Option<BackendScopeConfig>> {
        let row = sqlx::query_as::<sqlx::Postgres, ScopeRow>(
            "SELECT scope_id, access_key_id, secret_access_key_ciphertext, secret_access_key_nonce, \
             encryption_key_version, default_region, rotation_function_ref, deployment_status, \
             deployment_message, created_at, updated_at FROM backend_scopes WHERE scope_id = $1",
        )
        .bind(scope_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| KeyturnError::database(e, format!("Failed to get scope '{}'", scope_id)))?;

        row.map(|r| self.from_row(r)).transpose()
    }

    #[instrument(skip(self, config), fields(scope_id = %config.scope_id), name = "db_upsert_scope")]
    async fn upsert(&self, config: &BackendScopeConfig) -> Result<BackendScopeConfig> {
        let sealed = config
            .credentials
            .as_ref()
            .map(|c| self.encryption.seal_string(&c.secret_access_key))
            .transpose()?;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO backend_scopes (scope_id, access_key_id, secret_access_key_ciphertext, \
             secret_access_key_nonce, encryption_key_version, default_region, rotation_function_ref, \
             deployment_status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
             ON CONFLICT (scope_id) DO UPDATE SET \
               access_key_id = EXCLUDED.access_key_id, \
               secret_access_key_ciphertext = EXCLUDED.secret_access_key_ciphertext, \
               secret_access_key_nonce = EXCLUDED.secret_access_key_nonce, \
               encryption_key_version = EXCLUDED.encryption_key_version, \
               default_region = EXCLUDED.default_region, \
               rotation_function_ref = EXCLUDED.rotation_function_ref, \
               updated_at = EXCLUDED.updated_at",
        )
        .bind(config.scope_id.as_str())
        .bind(config.credentials.as_ref().map(|c| c.access_key_id.clone()))
        .bind(sealed.as_ref().map(|s| s.ciphertext.clone()))
        .bind(sealed.as_ref().map(|s| s.nonce.clone()))
        .bind(sealed.as_ref().map(|s| s.key_version.clone()))
        .bind(&config.default_region)
        .bind(&config.rotation_function_ref)
        .bind(config.deployment_status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            KeyturnError::database(e, format!("Failed to save scope '{}'", config.scope_id))
        })?;

        tracing::info!(scope_id = %config.scope_id, "Saved backend scope configuration");

        self.get(&config.scope_id)
            .await?
            .ok_or_else(|| KeyturnError::not_found("Scope", config.scope_id.as_str()))
    }

    #[instrument(skip(self, update), fields(scope_id = %scope_id, status = %update.status), name = "db_record_deployment")]
    async fn record_deployment(&self, scope_id: &ScopeId, update: DeploymentUpdate) -> Result<()> {
        let (touch_ref, new_ref) = match &update.rotation_function_ref {
            FunctionRefChange::Keep => (false, None),
            FunctionRefChange::Set(r) => (true, Some(r.as_str())),
            FunctionRefChange::Clear => (true, None),
        };

        let result = sqlx::query(
            "UPDATE backend_scopes SET deployment_status = $2, deployment_message = $3, \
             rotation_function_ref = CASE WHEN $4 THEN $5 ELSE rotation_function_ref END, \
             updated_at = $6 WHERE scope_id = $1",
        )
        .bind(scope_id.as_str())
        .bind(update.status.as_str())
        .bind(&update.message)
        .bind(touch_ref)
        .bind(new_ref)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            KeyturnError::database(
                e,
                format!("Failed to record deployment status for scope '{}'", scope_id),
            )
        })?;

        if result.rows_affected() == 0 {
            return Err(KeyturnError::not_found("Scope", scope_id.as_str()));
        }
        Ok(())
    }

    #[instrument(skip(self, expected), fields(scope_id = %scope_id, next = %next), name = "db_claim_deployment")]
    async fn claim_deployment(
        &self,
        scope_id: &ScopeId,
        expected: DeploymentClaim,
        next: DeploymentStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE backend_scopes SET deployment_status = $2, deployment_message = NULL, \
             updated_at = $3 WHERE scope_id = $1 AND deployment_status = $4 AND updated_at = $5",
        )
        .bind(scope_id.as_str())
        .bind(next.as_str())
        .bind(Utc::now())
        .bind(expected.status.as_str())
        .bind(expected.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            KeyturnError::database(e, format!("Failed to claim deployment for scope '{}'", scope_id))
        })?;

        Ok(result.rows_affected() == 1)
    }
}
