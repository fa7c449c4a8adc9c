//! Secret metadata repository
//!
//! Stores [`SecretRecord`] rows with a uniqueness constraint on
//! `(scope_id, name)`. LOCAL-mode values are sealed with [`SecretEncryption`]
//! before they are written; REMOTE-mode rows never carry a value.

use super::is_unique_violation;
use crate::domain::{
    NewSecretRecord, RotationSchedule, ScopeId, SecretId, SecretRecord, SecretType, StorageMode,
};
use crate::errors::{KeyturnError, Result};
use crate::secrets::SecretPayload;
use crate::services::{SealedValue, SecretEncryption};
use crate::storage::DbPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::sync::Arc;
use tracing::instrument;

const SECRET_COLUMNS: &str = "id, scope_id, name, secret_type, storage_mode, remote_ref, region, \
     rotation_enabled, rotation_schedule, last_rotated_at, description, created_at, updated_at";

/// Local persistence of secret metadata
#[async_trait]
pub trait SecretRecordStore: Send + Sync {
    /// Insert a new record. A duplicate `(scope_id, name)` fails with Conflict.
    async fn insert(&self, record: NewSecretRecord) -> Result<SecretRecord>;

    async fn get(&self, id: &SecretId) -> Result<Option<SecretRecord>>;

    async fn find_by_name(&self, scope_id: &ScopeId, name: &str) -> Result<Option<SecretRecord>>;

    /// Lookup by vault identifier, used by the rotation handler
    async fn find_by_remote_ref(&self, remote_ref: &str) -> Result<Option<SecretRecord>>;

    async fn list_by_scope(&self, scope_id: &ScopeId) -> Result<Vec<SecretRecord>>;

    /// Touch `updated_at`; a `None` description is left unchanged
    async fn update_metadata(
        &self,
        id: &SecretId,
        description: Option<&str>,
    ) -> Result<SecretRecord>;

    /// Replace the encrypted value of a LOCAL secret
    async fn store_local_value(&self, id: &SecretId, value: &SecretPayload) -> Result<()>;

    async fn load_local_value(&self, id: &SecretId) -> Result<Option<SecretPayload>>;

    async fn mark_rotated(&self, id: &SecretId, at: DateTime<Utc>) -> Result<SecretRecord>;

    /// Returns whether a row was removed
    async fn delete(&self, id: &SecretId) -> Result<bool>;
}

/// Database row structure for secrets
#[derive(Debug, Clone, FromRow)]
struct SecretRow {
    pub id: String,
    pub scope_id: String,
    pub name: String,
    pub secret_type: String,
    pub storage_mode: String,
    pub remote_ref: Option<String>,
    pub region: String,
    pub rotation_enabled: bool,
    pub rotation_schedule: Option<String>,
    pub last_rotated_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SecretRow> for SecretRecord {
    type Error = KeyturnError;

    fn try_from(row: SecretRow) -> Result<Self> {
        let secret_type = row.secret_type.parse::<SecretType>().map_err(KeyturnError::internal)?;
        let storage_mode =
            row.storage_mode.parse::<StorageMode>().map_err(KeyturnError::internal)?;
        let rotation_schedule = row
            .rotation_schedule
            .as_deref()
            .map(str::parse::<RotationSchedule>)
            .transpose()
            .map_err(KeyturnError::internal)?;

        Ok(SecretRecord {
            id: SecretId::from_string(row.id),
            scope_id: ScopeId::from_string(row.scope_id),
            name: row.name,
            secret_type,
            storage_mode,
            remote_ref: row.remote_ref,
            region: row.region,
            rotation_enabled: row.rotation_enabled,
            rotation_schedule,
            last_rotated_at: row.last_rotated_at,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SealedValueRow {
    pub value_ciphertext: Option<Vec<u8>>,
    pub value_nonce: Option<Vec<u8>>,
    pub encryption_key_version: Option<String>,
}

/// PostgreSQL implementation of [`SecretRecordStore`]
#[derive(Debug, Clone)]
pub struct SqlxSecretRepository {
    pool: DbPool,
    encryption: Arc<SecretEncryption>,
}

impl SqlxSecretRepository {
    pub fn new(pool: DbPool, encryption: Arc<SecretEncryption>) -> Self {
        Self { pool, encryption }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn fetch_one_by_id(&self, id: &SecretId) -> Result<SecretRecord> {
        self.get(id).await?.ok_or_else(|| KeyturnError::not_found("Secret", id.as_str()))
    }
}

#[async_trait]
impl SecretRecordStore for SqlxSecretRepository {
    #[instrument(skip(self, record), fields(scope_id = %record.scope_id, secret_name = %record.name), name = "db_insert_secret")]
    async fn insert(&self, record: NewSecretRecord) -> Result<SecretRecord> {
        let id = SecretId::new();
        let now = Utc::now();
        let sealed = match (&record.storage_mode, &record.local_value) {
            (StorageMode::Local, Some(value)) => Some(self.encryption.seal_payload(value)?),
            (StorageMode::Local, None) => {
                return Err(KeyturnError::validation("LOCAL secrets require a value"))
            }
            (StorageMode::Remote, _) => None,
        };

        let query = format!(
            "INSERT INTO secrets (id, scope_id, name, secret_type, storage_mode, remote_ref, region, \
             rotation_enabled, rotation_schedule, description, value_ciphertext, value_nonce, \
             encryption_key_version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14) \
             RETURNING {}",
            SECRET_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, SecretRow>(&query)
            .bind(id.as_str())
            .bind(record.scope_id.as_str())
            .bind(&record.name)
            .bind(record.secret_type.as_str())
            .bind(record.storage_mode.as_str())
            .bind(&record.remote_ref)
            .bind(&record.region)
            .bind(record.rotation_enabled)
            .bind(record.rotation_schedule.as_ref().map(ToString::to_string))
            .bind(&record.description)
            .bind(sealed.as_ref().map(|s| s.ciphertext.clone()))
            .bind(sealed.as_ref().map(|s| s.nonce.clone()))
            .bind(sealed.as_ref().map(|s| s.key_version.clone()))
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    return KeyturnError::conflict(
                        format!(
                            "Secret '{}' already exists in scope '{}'",
                            record.name, record.scope_id
                        ),
                        "Secret",
                    );
                }
                tracing::error!(error = %e, secret_name = %record.name, "Failed to insert secret");
                KeyturnError::database(e, format!("Failed to create secret '{}'", record.name))
            })?;

        tracing::info!(
            secret_id = %id,
            secret_name = %record.name,
            secret_type = %record.secret_type,
            storage_mode = %record.storage_mode,
            "Created secret record"
        );

        SecretRecord::try_from(row)
    }

    #[instrument(skip(self), fields(secret_id = %id), name = "db_get_secret")]
    async fn get(&self, id: &SecretId) -> Result<Option<SecretRecord>> {
        let query = format!("SELECT {} FROM secrets WHERE id = $1", SECRET_COLUMNS);
        let row = sqlx::query_as::<sqlx::Postgres, SecretRow>(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                KeyturnError::database(e, format!("Failed to get secret with ID '{}'", id))
            })?;

        row.map(SecretRecord::try_from).transpose()
    }

    #[instrument(skip(self), fields(scope_id = %scope_id, secret_name = %name), name = "db_find_secret_by_name")]
    async fn find_by_name(&self, scope_id: &ScopeId, name: &str) -> Result<Option<SecretRecord>> {
        let query =
            format!("SELECT {} FROM secrets WHERE scope_id = $1 AND name = $2", SECRET_COLUMNS);
        let row = sqlx::query_as::<sqlx::Postgres, SecretRow>(&query)
            .bind(scope_id.as_str())
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                KeyturnError::database(
                    e,
                    format!("Failed to get secret '{}' in scope '{}'", name, scope_id),
                )
            })?;

        row.map(SecretRecord::try_from).transpose()
    }

    #[instrument(skip(self), name = "db_find_secret_by_remote_ref")]
    async fn find_by_remote_ref(&self, remote_ref: &str) -> Result<Option<SecretRecord>> {
        let query = format!("SELECT {} FROM secrets WHERE remote_ref = $1", SECRET_COLUMNS);
        let row = sqlx::query_as::<sqlx::Postgres, SecretRow>(&query)
            .bind(remote_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| KeyturnError::database(e, "Failed to get secret by remote reference"))?;

        row.map(SecretRecord::try_from).transpose()
    }

    #[instrument(skip(self), fields(scope_id = %scope_id), name = "db_list_secrets_by_scope")]
    async fn list_by_scope(&self, scope_id: &ScopeId) -> Result<Vec<SecretRecord>> {
        let query =
            format!("SELECT {} FROM secrets WHERE scope_id = $1 ORDER BY name", SECRET_COLUMNS);
        let rows = sqlx::query_as::<sqlx::Postgres, SecretRow>(&query)
            .bind(scope_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                KeyturnError::database(e, format!("Failed to list secrets for scope '{}'", scope_id))
            })?;

        rows.into_iter().map(SecretRecord::try_from).collect()
    }

    #[instrument(skip(self, description), fields(secret_id = %id), name = "db_update_secret_metadata")]
    async fn update_metadata(
        &self,
        id: &SecretId,
        description: Option<&str>,
    ) -> Result<SecretRecord> {
        let query = format!(
            "UPDATE secrets SET description = COALESCE($2, description), updated_at = $3 \
             WHERE id = $1 RETURNING {}",
            SECRET_COLUMNS
        );
        let row = sqlx::query_as::<sqlx::Postgres, SecretRow>(&query)
            .bind(id.as_str())
            .bind(description)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| KeyturnError::database(e, format!("Failed to update secret '{}'", id)))?
            .ok_or_else(|| KeyturnError::not_found("Secret", id.as_str()))?;

        SecretRecord::try_from(row)
    }

    #[instrument(skip(self, value), fields(secret_id = %id), name = "db_store_local_value")]
    async fn store_local_value(&self, id: &SecretId, value: &SecretPayload) -> Result<()> {
        let sealed = self.encryption.seal_payload(value)?;
        let result = sqlx::query(
            "UPDATE secrets SET value_ciphertext = $2, value_nonce = $3, \
             encryption_key_version = $4 WHERE id = $1 AND storage_mode = 'LOCAL'",
        )
        .bind(id.as_str())
        .bind(&sealed.ciphertext)
        .bind(&sealed.nonce)
        .bind(&sealed.key_version)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            KeyturnError::database(e, format!("Failed to store value for secret '{}'", id))
        })?;

        if result.rows_affected() == 0 {
            return Err(KeyturnError::not_found("Local secret", id.as_str()));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(secret_id = %id), name = "db_load_local_value")]
    async fn load_local_value(&self, id: &SecretId) -> Result<Option<SecretPayload>> {
        let row = sqlx::query_as::<sqlx::Postgres, SealedValueRow>(
            "SELECT value_ciphertext, value_nonce, encryption_key_version FROM secrets WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            KeyturnError::database(e, format!("Failed to load value for secret '{}'", id))
        })?;

        match row {
            Some(SealedValueRow {
                value_ciphertext: Some(ciphertext),
                value_nonce: Some(nonce),
                encryption_key_version: Some(key_version),
            }) => {
                let sealed = SealedValue { ciphertext, nonce, key_version };
                self.encryption.open_payload(&sealed).map(Some)
            }
            _ => Ok(None),
        }
    }

    #[instrument(skip(self), fields(secret_id = %id), name = "db_mark_secret_rotated")]
    async fn mark_rotated(&self, id: &SecretId, at: DateTime<Utc>) -> Result<SecretRecord> {
        sqlx::query("UPDATE secrets SET last_rotated_at = $2, updated_at = $2 WHERE id = $1")
            .bind(id.as_str())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                KeyturnError::database(e, format!("Failed to stamp rotation for secret '{}'", id))
            })?;

        self.fetch_one_by_id(id).await
    }

    #[instrument(skip(self), fields(secret_id = %id), name = "db_delete_secret")]
    async fn delete(&self, id: &SecretId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM secrets WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| KeyturnError::database(e, format!("Failed to delete secret '{}'", id)))?;

        Ok(result.rows_affected() > 0)
    }
}
