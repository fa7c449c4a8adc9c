//! In-memory stores with the same contracts as the PostgreSQL repositories.
//!
//! Used by the test suites and for running the binary without a database
//! during development. Uniqueness of `(scope_id, name)` is enforced atomically
//! under a single lock, like the database constraint.

use super::repositories::{
    DeploymentClaim, DeploymentUpdate, FunctionRefChange, ScopeConfigStore, SecretRecordStore,
};
use crate::domain::{
    BackendScopeConfig, DeploymentStatus, NewSecretRecord, ScopeId, SecretId, SecretRecord,
    StorageMode,
};
use crate::errors::{KeyturnError, Result};
use crate::secrets::SecretPayload;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

fn poisoned() -> KeyturnError {
    KeyturnError::internal("in-memory store lock poisoned")
}

#[derive(Debug, Default)]
struct SecretTable {
    records: HashMap<SecretId, SecretRecord>,
    local_values: HashMap<SecretId, SecretPayload>,
    insert_failure: Option<KeyturnError>,
    update_failure: Option<KeyturnError>,
}

/// [`SecretRecordStore`] backed by a `HashMap`
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    table: Mutex<SecretTable>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SecretTable>> {
        self.table.lock().map_err(|_| poisoned())
    }

    /// Make the next insert fail with `error`
    pub fn fail_next_insert(&self, error: KeyturnError) {
        if let Ok(mut table) = self.lock() {
            table.insert_failure = Some(error);
        }
    }

    /// Make the next metadata update fail with `error`
    pub fn fail_next_update(&self, error: KeyturnError) {
        if let Ok(mut table) = self.lock() {
            table.update_failure = Some(error);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|t| t.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SecretRecordStore for InMemorySecretStore {
    async fn insert(&self, record: NewSecretRecord) -> Result<SecretRecord> {
        let mut table = self.lock()?;
        if let Some(err) = table.insert_failure.take() {
            return Err(err);
        }
        if table.records.values().any(|r| r.scope_id == record.scope_id && r.name == record.name)
        {
            return Err(KeyturnError::conflict(
                format!("Secret '{}' already exists in scope '{}'", record.name, record.scope_id),
                "Secret",
            ));
        }

        let now = Utc::now();
        let stored = SecretRecord {
            id: SecretId::new(),
            scope_id: record.scope_id,
            name: record.name,
            secret_type: record.secret_type,
            storage_mode: record.storage_mode,
            remote_ref: record.remote_ref,
            region: record.region,
            rotation_enabled: record.rotation_enabled,
            rotation_schedule: record.rotation_schedule,
            last_rotated_at: None,
            description: record.description,
            created_at: now,
            updated_at: now,
        };

        if stored.storage_mode == StorageMode::Local {
            let value = record
                .local_value
                .ok_or_else(|| KeyturnError::validation("LOCAL secrets require a value"))?;
            table.local_values.insert(stored.id.clone(), value);
        }
        table.records.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: &SecretId) -> Result<Option<SecretRecord>> {
        Ok(self.lock()?.records.get(id).cloned())
    }

    async fn find_by_name(&self, scope_id: &ScopeId, name: &str) -> Result<Option<SecretRecord>> {
        Ok(self
            .lock()?
            .records
            .values()
            .find(|r| &r.scope_id == scope_id && r.name == name)
            .cloned())
    }

    async fn find_by_remote_ref(&self, remote_ref: &str) -> Result<Option<SecretRecord>> {
        Ok(self
            .lock()?
            .records
            .values()
            .find(|r| r.remote_ref.as_deref() == Some(remote_ref))
            .cloned())
    }

    async fn list_by_scope(&self, scope_id: &ScopeId) -> Result<Vec<SecretRecord>> {
        let mut records: Vec<SecretRecord> =
            self.lock()?.records.values().filter(|r| &r.scope_id == scope_id).cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn update_metadata(
        &self,
        id: &SecretId,
        description: Option<&str>,
    ) -> Result<SecretRecord> {
        let mut table = self.lock()?;
        if let Some(err) = table.update_failure.take() {
            return Err(err);
        }
        let record =
            table.records.get_mut(id).ok_or_else(|| KeyturnError::not_found("Secret", id.as_str()))?;
        if let Some(description) = description {
            record.description = Some(description.to_string());
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn store_local_value(&self, id: &SecretId, value: &SecretPayload) -> Result<()> {
        let mut table = self.lock()?;
        match table.records.get(id) {
            Some(r) if r.storage_mode == StorageMode::Local => {
                table.local_values.insert(id.clone(), value.clone());
                Ok(())
            }
            _ => Err(KeyturnError::not_found("Local secret", id.as_str())),
        }
    }

    async fn load_local_value(&self, id: &SecretId) -> Result<Option<SecretPayload>> {
        Ok(self.lock()?.local_values.get(id).cloned())
    }

    async fn mark_rotated(&self, id: &SecretId, at: DateTime<Utc>) -> Result<SecretRecord> {
        let mut table = self.lock()?;
        let record =
            table.records.get_mut(id).ok_or_else(|| KeyturnError::not_found("Secret", id.as_str()))?;
        record.last_rotated_at = Some(at);
        record.updated_at = at;
        Ok(record.clone())
    }

    async fn delete(&self, id: &SecretId) -> Result<bool> {
        let mut table = self.lock()?;
        table.local_values.remove(id);
        Ok(table.records.remove(id).is_some())
    }
}

/// [`ScopeConfigStore`] backed by a `HashMap`
#[derive(Debug, Default)]
pub struct InMemoryScopeStore {
    scopes: Mutex<HashMap<ScopeId, BackendScopeConfig>>,
}

impl InMemoryScopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the given scopes
    pub fn with_scopes(scopes: impl IntoIterator<Item = BackendScopeConfig>) -> Self {
        let store = Self::default();
        if let Ok(mut map) = store.scopes.lock() {
            map.extend(scopes.into_iter().map(|s| (s.scope_id.clone(), s)));
        }
        store
    }
}

#[async_trait]
impl ScopeConfigStore for InMemoryScopeStore {
    async fn get(&self, scope_id: &ScopeId) -> Result<Option<BackendScopeConfig>> {
        Ok(self.scopes.lock().map_err(|_| poisoned())?.get(scope_id).cloned())
    }

    async fn upsert(&self, config: &BackendScopeConfig) -> Result<BackendScopeConfig> {
        let mut scopes = self.scopes.lock().map_err(|_| poisoned())?;
        let now = Utc::now();
        let stored = match scopes.get(&config.scope_id) {
            Some(existing) => BackendScopeConfig {
                deployment_status: existing.deployment_status,
                deployment_message: existing.deployment_message.clone(),
                created_at: existing.created_at,
                updated_at: now,
                ..config.clone()
            },
            None => BackendScopeConfig { created_at: now, updated_at: now, ..config.clone() },
        };
        scopes.insert(stored.scope_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn record_deployment(&self, scope_id: &ScopeId, update: DeploymentUpdate) -> Result<()> {
        let mut scopes = self.scopes.lock().map_err(|_| poisoned())?;
        let scope = scopes
            .get_mut(scope_id)
            .ok_or_else(|| KeyturnError::not_found("Scope", scope_id.as_str()))?;

        scope.deployment_status = update.status;
        scope.deployment_message = update.message;
        match update.rotation_function_ref {
            FunctionRefChange::Keep => {}
            FunctionRefChange::Set(r) => scope.rotation_function_ref = Some(r),
            FunctionRefChange::Clear => scope.rotation_function_ref = None,
        }
        scope.updated_at = Utc::now();
        Ok(())
    }

    async fn claim_deployment(
        &self,
        scope_id: &ScopeId,
        expected: DeploymentClaim,
        next: DeploymentStatus,
    ) -> Result<bool> {
        let mut scopes = self.scopes.lock().map_err(|_| poisoned())?;
        let scope = scopes
            .get_mut(scope_id)
            .ok_or_else(|| KeyturnError::not_found("Scope", scope_id.as_str()))?;

        if DeploymentClaim::of(scope) != expected {
            return Ok(false);
        }
        scope.deployment_status = next;
        scope.deployment_message = None;
        scope.updated_at = Utc::now();
        Ok(true)
    }
}
