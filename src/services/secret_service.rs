//! Secret lifecycle service
//!
//! Keeps local metadata and the remote vault consistent across create,
//! update, delete and rotate. The ordering rules:
//!
//! - every check that needs no remote call runs before the first vault write
//! - create writes the vault first and records a compensation for each remote
//!   mutation, unwinding them if a later step fails
//! - update writes the vault first and touches local metadata only after the
//!   vault accepted the new value
//! - delete always removes the local record, even when the remote delete fails
//!
//! A vault client is built per operation from the scope's credentials.

use crate::domain::{
    BackendScopeConfig, CreateSecretRequest, NewSecretRecord, RotationSchedule, ScopeId,
    SecretId, SecretRecord, SecretWithValue, StorageMode, UpdateSecretRequest,
};
use crate::errors::{KeyturnError, Result};
use crate::observability::MetricsRecorder;
use crate::secrets::{
    CreateRemoteSecret, DeletionMode, PutValue, RotationRule, SecretVaultClient,
    VaultClientFactory, VaultOperation, SCOPE_TAG, SECRET_TYPE_TAG,
};
use crate::services::compensation::{Compensation, CompensationLog};
use crate::storage::{ScopeConfigStore, SecretRecordStore};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Tunables for [`SecretService`]
#[derive(Debug, Clone)]
pub struct SecretServiceOptions {
    /// Soft-delete recovery window used when `force` is false
    pub recovery_window_days: u32,
    /// Applied when rotation is enabled without an explicit schedule
    pub default_rotation_schedule: RotationSchedule,
}

impl Default for SecretServiceOptions {
    fn default() -> Self {
        Self { recovery_window_days: 30, default_rotation_schedule: RotationSchedule::EveryDays(30) }
    }
}

/// Coordinates local metadata and the remote vault
pub struct SecretService {
    secrets: Arc<dyn SecretRecordStore>,
    scopes: Arc<dyn ScopeConfigStore>,
    vaults: Arc<dyn VaultClientFactory>,
    options: SecretServiceOptions,
    metrics: MetricsRecorder,
}

impl SecretService {
    pub fn new(
        secrets: Arc<dyn SecretRecordStore>,
        scopes: Arc<dyn ScopeConfigStore>,
        vaults: Arc<dyn VaultClientFactory>,
    ) -> Self {
        Self {
            secrets,
            scopes,
            vaults,
            options: SecretServiceOptions::default(),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn with_options(mut self, options: SecretServiceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = metrics;
        self
    }

    async fn load_record(&self, id: &SecretId) -> Result<SecretRecord> {
        self.secrets.get(id).await?.ok_or_else(|| KeyturnError::not_found("Secret", id.as_str()))
    }

    async fn load_scope(&self, scope_id: &ScopeId) -> Result<BackendScopeConfig> {
        self.scopes
            .get(scope_id)
            .await?
            .ok_or_else(|| KeyturnError::not_found("Scope", scope_id.as_str()))
    }

    /// Build a vault client from the scope's credentials. Makes no vault call.
    async fn vault_for(
        &self,
        scope: &BackendScopeConfig,
        region: &str,
    ) -> Result<Arc<dyn SecretVaultClient>> {
        let credentials = scope.usable_credentials().ok_or_else(|| {
            KeyturnError::invalid_configuration(format!(
                "Scope '{}' has no vault credentials configured",
                scope.scope_id
            ))
        })?;
        self.vaults
            .client(credentials, region)
            .await
            .map_err(|e| KeyturnError::upstream("build vault client", e))
    }

    fn remote_ref<'a>(&self, record: &'a SecretRecord) -> Result<&'a str> {
        record.remote_ref.as_deref().ok_or_else(|| {
            KeyturnError::internal(format!("Remote secret '{}' has no remote reference", record.id))
        })
    }

    /// Create a secret, returning its metadata
    #[instrument(
        skip(self, request),
        fields(scope_id = %request.scope_id, name = %request.name, secret_type = %request.secret_type),
        name = "create_secret"
    )]
    pub async fn create_secret(&self, request: CreateSecretRequest) -> Result<SecretRecord> {
        let result = self.create_secret_inner(request).await;
        self.metrics.record_lifecycle("create", result.is_ok());
        result
    }

    async fn create_secret_inner(&self, request: CreateSecretRequest) -> Result<SecretRecord> {
        request.validate_shape().map_err(KeyturnError::validation)?;
        let scope = self.load_scope(&request.scope_id).await?;

        let rotation_function = if request.rotation_enabled {
            if request.storage_mode == StorageMode::Local {
                return Err(KeyturnError::invalid_configuration(
                    "Rotation is not available for LOCAL secrets",
                ));
            }
            if !request.secret_type.supports_rotation() {
                return Err(KeyturnError::invalid_configuration(format!(
                    "Secret type {} does not support rotation",
                    request.secret_type
                )));
            }
            let function = scope.rotation_function().ok_or_else(|| {
                KeyturnError::invalid_configuration(format!(
                    "Scope '{}' has no rotation function deployed",
                    scope.scope_id
                ))
            })?;
            Some(function.to_string())
        } else {
            None
        };

        let name = request.name.trim().to_string();
        if self.secrets.find_by_name(&request.scope_id, &name).await?.is_some() {
            return Err(KeyturnError::conflict(
                format!("Secret '{}' already exists in scope '{}'", name, request.scope_id),
                "Secret",
            ));
        }

        let region = request.region.clone().unwrap_or_else(|| scope.default_region.clone());
        let rotation_schedule = request.rotation_enabled.then(|| {
            request
                .rotation_schedule
                .clone()
                .unwrap_or_else(|| self.options.default_rotation_schedule.clone())
        });

        let mut new_record = NewSecretRecord {
            scope_id: request.scope_id.clone(),
            name: name.clone(),
            secret_type: request.secret_type,
            storage_mode: request.storage_mode,
            remote_ref: None,
            region: region.clone(),
            rotation_enabled: request.rotation_enabled,
            rotation_schedule: rotation_schedule.clone(),
            description: request.description.clone(),
            local_value: None,
        };

        if request.storage_mode == StorageMode::Local {
            new_record.local_value = Some(request.value);
            let created = self.secrets.insert(new_record).await?;
            info!(secret_id = %created.id, "Local secret created");
            return Ok(created);
        }

        let vault = self.vault_for(&scope, &region).await?;

        let existing = self
            .metrics
            .time_vault_call(VaultOperation::Describe.as_str(), vault.describe_secret(&name))
            .await;
        match existing {
            Ok(_) => {
                return Err(KeyturnError::conflict(
                    format!("Secret '{}' already exists upstream", name),
                    "Secret",
                ))
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(KeyturnError::upstream("describe remote secret", e)),
        }

        let tags = BTreeMap::from([
            (SECRET_TYPE_TAG.to_string(), request.secret_type.as_str().to_string()),
            (SCOPE_TAG.to_string(), request.scope_id.to_string()),
        ]);
        let created = self
            .metrics
            .time_vault_call(
                VaultOperation::Create.as_str(),
                vault.create_secret(CreateRemoteSecret {
                    name: name.clone(),
                    value: request.value,
                    description: request.description.clone(),
                    tags,
                }),
            )
            .await
            .map_err(|e| match e {
                crate::secrets::VaultError::AlreadyExists { .. } => KeyturnError::conflict(
                    format!("Secret '{}' already exists upstream", name),
                    "Secret",
                ),
                other => KeyturnError::upstream("create remote secret", other),
            })?;

        let mut compensations = CompensationLog::new();
        compensations.record(Compensation::DeleteRemoteSecret { remote_ref: created.arn.clone() });

        if let (Some(function), Some(schedule)) = (&rotation_function, &rotation_schedule) {
            let rule = RotationRule::from(schedule);
            let enabled = self
                .metrics
                .time_vault_call(
                    VaultOperation::EnableRotation.as_str(),
                    vault.enable_rotation(&created.arn, function, &rule),
                )
                .await;
            if let Err(e) = enabled {
                warn!(remote_ref = %created.arn, error = %e, "Enabling rotation failed, rolling back");
                compensations.unwind(vault.as_ref(), &self.metrics).await;
                return Err(KeyturnError::upstream("enable rotation", e));
            }
        }

        new_record.remote_ref = Some(created.arn.clone());
        match self.secrets.insert(new_record).await {
            Ok(record) => {
                compensations.commit();
                info!(
                    secret_id = %record.id,
                    remote_ref = %created.arn,
                    rotation_enabled = record.rotation_enabled,
                    "Secret created"
                );
                Ok(record)
            }
            // A Conflict here means a concurrent create won the name locally;
            // the remote secret created above is still only ours to remove.
            Err(e) => {
                warn!(remote_ref = %created.arn, error = %e, "Persisting metadata failed, rolling back");
                compensations.unwind(vault.as_ref(), &self.metrics).await;
                Err(e)
            }
        }
    }

    /// Metadata only
    pub async fn get_secret(&self, id: &SecretId) -> Result<SecretRecord> {
        self.load_record(id).await
    }

    pub async fn list_secrets(&self, scope_id: &ScopeId) -> Result<Vec<SecretRecord>> {
        self.load_scope(scope_id).await?;
        self.secrets.list_by_scope(scope_id).await
    }

    /// Metadata merged with the value currently holding CURRENT
    #[instrument(skip(self), fields(secret_id = %id), name = "get_secret_with_value")]
    pub async fn get_secret_with_value(&self, id: &SecretId) -> Result<SecretWithValue> {
        let record = self.load_record(id).await?;

        let value = match record.storage_mode {
            StorageMode::Local => self
                .secrets
                .load_local_value(&record.id)
                .await?
                .ok_or_else(|| KeyturnError::not_found("Local secret value", record.id.as_str()))?,
            StorageMode::Remote => {
                let scope = self.load_scope(&record.scope_id).await?;
                let vault = self.vault_for(&scope, &record.region).await?;
                let remote_ref = self.remote_ref(&record)?;
                self.metrics
                    .time_vault_call(
                        VaultOperation::GetValue.as_str(),
                        vault.get_current_value(remote_ref),
                    )
                    .await
                    .and_then(|v| v.decode())
                    .map_err(|e| KeyturnError::upstream("read current secret value", e))?
            }
        };

        Ok(SecretWithValue { metadata: record, value })
    }

    /// Replace the value and/or description
    #[instrument(skip(self, request), fields(secret_id = %id), name = "update_secret")]
    pub async fn update_secret(
        &self,
        id: &SecretId,
        request: UpdateSecretRequest,
    ) -> Result<SecretRecord> {
        let result = self.update_secret_inner(id, request).await;
        self.metrics.record_lifecycle("update", result.is_ok());
        result
    }

    async fn update_secret_inner(
        &self,
        id: &SecretId,
        request: UpdateSecretRequest,
    ) -> Result<SecretRecord> {
        let record = self.load_record(id).await?;

        if let Some(value) = request.value {
            if value.is_empty() {
                return Err(KeyturnError::validation_field("secret value cannot be empty", "value"));
            }
            match record.storage_mode {
                StorageMode::Local => self.secrets.store_local_value(&record.id, &value).await?,
                StorageMode::Remote => {
                    let scope = self.load_scope(&record.scope_id).await?;
                    let vault = self.vault_for(&scope, &record.region).await?;
                    let remote_ref = self.remote_ref(&record)?;
                    let version = self
                        .metrics
                        .time_vault_call(
                            VaultOperation::PutValue.as_str(),
                            vault.put_value(remote_ref, PutValue::current(value)),
                        )
                        .await
                        .map_err(|e| KeyturnError::upstream("update remote secret value", e))?;
                    info!(secret_id = %record.id, version_id = %version, "Remote value updated");
                }
            }
        }

        self.secrets.update_metadata(&record.id, request.description.as_deref()).await
    }

    /// Delete the local record and, best effort, its remote counterpart.
    /// `force` skips the vault's recovery window.
    #[instrument(skip(self), fields(secret_id = %id), name = "delete_secret")]
    pub async fn delete_secret(&self, id: &SecretId, force: bool) -> Result<()> {
        let record = self.load_record(id).await?;

        if record.storage_mode == StorageMode::Remote {
            self.delete_remote(&record, force).await;
        }

        self.secrets.delete(&record.id).await?;
        self.metrics.record_lifecycle("delete", true);
        info!(secret_id = %record.id, name = %record.name, "Secret deleted");
        Ok(())
    }

    async fn delete_remote(&self, record: &SecretRecord, force: bool) {
        let Some(remote_ref) = record.remote_ref.as_deref() else {
            warn!(secret_id = %record.id, "Remote secret has no remote reference, skipping vault delete");
            return;
        };

        let vault = match self.load_scope(&record.scope_id).await {
            Ok(scope) => self.vault_for(&scope, &record.region).await,
            Err(e) => Err(e),
        };
        let vault = match vault {
            Ok(vault) => vault,
            Err(e) => {
                warn!(
                    secret_id = %record.id,
                    remote_ref,
                    error = %e,
                    "No vault client available, skipping remote delete"
                );
                return;
            }
        };

        let mode = if force {
            DeletionMode::Force
        } else {
            DeletionMode::RecoveryWindow { days: self.options.recovery_window_days }
        };
        let deleted = self
            .metrics
            .time_vault_call(VaultOperation::Delete.as_str(), vault.delete_secret(remote_ref, mode))
            .await;
        match deleted {
            Ok(()) => info!(remote_ref, ?mode, "Remote secret deleted"),
            Err(e) if e.is_not_found() => info!(remote_ref, "Remote secret already gone"),
            Err(e) => warn!(
                remote_ref,
                error = %e,
                "Remote delete failed; the remote secret is orphaned"
            ),
        }
    }

    /// Ask the vault to start a rotation now
    #[instrument(skip(self), fields(secret_id = %id), name = "rotate_secret")]
    pub async fn rotate_secret(&self, id: &SecretId) -> Result<SecretRecord> {
        let result = self.rotate_secret_inner(id).await;
        self.metrics.record_lifecycle("rotate", result.is_ok());
        result
    }

    async fn rotate_secret_inner(&self, id: &SecretId) -> Result<SecretRecord> {
        let record = self.load_record(id).await?;
        if !record.rotation_enabled {
            return Err(KeyturnError::invalid_configuration(format!(
                "Rotation is not enabled for secret '{}'",
                record.name
            )));
        }

        let scope = self.load_scope(&record.scope_id).await?;
        let vault = self.vault_for(&scope, &record.region).await?;
        let remote_ref = self.remote_ref(&record)?;
        let token = self
            .metrics
            .time_vault_call(VaultOperation::Rotate.as_str(), vault.rotate_secret(remote_ref))
            .await
            .map_err(|e| KeyturnError::upstream("rotate secret", e))?;

        info!(secret_id = %record.id, request_token = %token, "Rotation started");
        self.secrets.mark_rotated(&record.id, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SecretType, VaultCredentials, VersionStage};
    use crate::secrets::{InMemoryVault, InMemoryVaultFactory, SecretPayload, VaultError};
    use crate::storage::{InMemoryScopeStore, InMemorySecretStore};
    use tracing_test::traced_test;

    struct Fixture {
        service: SecretService,
        vault: Arc<InMemoryVault>,
        store: Arc<InMemorySecretStore>,
    }

    fn fixture(scope: BackendScopeConfig) -> Fixture {
        let vault = Arc::new(InMemoryVault::default());
        let store = Arc::new(InMemorySecretStore::new());
        let service = SecretService::new(
            store.clone(),
            Arc::new(InMemoryScopeStore::with_scopes([scope])),
            Arc::new(InMemoryVaultFactory::new(vault.clone())),
        );
        Fixture { service, vault, store }
    }

    fn scope() -> BackendScopeConfig {
        BackendScopeConfig::new(ScopeId::from_str_unchecked("tenant"), "eu-west-1")
            .with_credentials(VaultCredentials::new("AKIA1", "secret"))
            .with_rotation_function("arn:fn:rotate")
    }

    fn request(name: &str) -> CreateSecretRequest {
        CreateSecretRequest {
            scope_id: ScopeId::from_str_unchecked("tenant"),
            name: name.to_string(),
            secret_type: SecretType::GenericSecret,
            value: SecretPayload::single("value", "s3cret"),
            description: Some("api token".to_string()),
            storage_mode: StorageMode::Remote,
            rotation_enabled: false,
            rotation_schedule: None,
            region: None,
        }
    }

    #[tokio::test]
    async fn test_create_tags_remote_and_uses_scope_region() {
        let f = fixture(scope());
        let record = f.service.create_secret(request("api")).await.unwrap();

        assert_eq!(record.region, "eu-west-1");
        let remote = record.remote_ref.clone().unwrap();
        let description = f.vault.describe_secret(&remote).await.unwrap();
        assert_eq!(description.tag(SECRET_TYPE_TAG), Some("GENERIC_SECRET"));
        assert_eq!(description.tag(SCOPE_TAG), Some("tenant"));
    }

    #[tokio::test]
    async fn test_default_schedule_applied_when_rotation_enabled() {
        let f = fixture(scope());
        let mut req = request("rotating");
        req.rotation_enabled = true;

        let record = f.service.create_secret(req).await.unwrap();
        assert_eq!(record.rotation_schedule, Some(RotationSchedule::EveryDays(30)));
        let description = f.vault.describe_secret(record.remote_ref.as_deref().unwrap()).await.unwrap();
        assert_eq!(description.rotation_function_ref.as_deref(), Some("arn:fn:rotate"));
    }

    #[tokio::test]
    async fn test_upstream_duplicate_is_conflict() {
        let f = fixture(scope());
        f.vault
            .create_secret(CreateRemoteSecret {
                name: "taken".into(),
                value: SecretPayload::single("value", "x"),
                description: None,
                tags: BTreeMap::new(),
            })
            .await
            .unwrap();

        let err = f.service.create_secret(request("taken")).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("already exists upstream"));
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_describe_failure_is_surfaced() {
        let f = fixture(scope());
        f.vault.fail_next(VaultOperation::Describe, VaultError::timeout("describe"));

        let err = f.service.create_secret(request("api")).await.unwrap_err();
        assert!(matches!(err, KeyturnError::Upstream { .. }));
        assert_eq!(f.vault.calls(VaultOperation::Create), 0);
    }

    #[tokio::test]
    async fn test_enable_rotation_failure_rolls_back_remote() {
        let f = fixture(scope());
        f.vault.fail_next(VaultOperation::EnableRotation, VaultError::backend("denied"));
        let mut req = request("rotating");
        req.rotation_enabled = true;

        let err = f.service.create_secret(req).await.unwrap_err();
        assert!(matches!(err, KeyturnError::Upstream { .. }));
        assert_eq!(f.vault.calls(VaultOperation::Delete), 1);
        assert!(!f.vault.contains("rotating"));
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_scope_without_credentials_is_invalid_configuration() {
        let f = fixture(BackendScopeConfig::new(ScopeId::from_str_unchecked("tenant"), "us-east-1"));

        let err = f.service.create_secret(request("api")).await.unwrap_err();
        assert!(matches!(err, KeyturnError::InvalidConfiguration { .. }));
        assert_eq!(f.vault.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_local_mode_never_calls_vault() {
        let f = fixture(scope());
        let mut req = request("local");
        req.storage_mode = StorageMode::Local;

        let record = f.service.create_secret(req).await.unwrap();
        assert!(record.remote_ref.is_none());

        let with_value = f.service.get_secret_with_value(&record.id).await.unwrap();
        assert_eq!(with_value.value.get_str("value"), Some("s3cret"));

        f.service
            .update_secret(
                &record.id,
                UpdateSecretRequest { value: Some(SecretPayload::single("value", "n3w")), description: None },
            )
            .await
            .unwrap();
        let with_value = f.service.get_secret_with_value(&record.id).await.unwrap();
        assert_eq!(with_value.value.get_str("value"), Some("n3w"));

        f.service.delete_secret(&record.id, false).await.unwrap();
        assert_eq!(f.vault.total_calls(), 0);
    }

    #[tokio::test]
    #[cfg(not(feature = "aws"))]
    async fn test_rotation_without_registered_strategy_is_rejected_before_vault() {
        let f = fixture(scope());
        let mut req = request("deployer-key");
        req.secret_type = SecretType::AwsApiKey;
        req.rotation_enabled = true;

        let err = f.service.create_secret(req).await.unwrap_err();
        assert!(matches!(err, KeyturnError::InvalidConfiguration { .. }));
        assert!(err.to_string().contains("AWS_API_KEY"));
        assert_eq!(f.vault.total_calls(), 0);
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_local_mode_rejects_rotation() {
        let f = fixture(scope());
        let mut req = request("local");
        req.storage_mode = StorageMode::Local;
        req.rotation_enabled = true;

        let err = f.service.create_secret(req).await.unwrap_err();
        assert!(matches!(err, KeyturnError::InvalidConfiguration { .. }));
    }

    #[tokio::test]
    async fn test_update_value_creates_new_current_version() {
        let f = fixture(scope());
        let record = f.service.create_secret(request("api")).await.unwrap();

        f.service
            .update_secret(
                &record.id,
                UpdateSecretRequest {
                    value: Some(SecretPayload::single("value", "rotated-by-hand")),
                    description: Some("updated".into()),
                },
            )
            .await
            .unwrap();

        let with_value = f.service.get_secret_with_value(&record.id).await.unwrap();
        assert_eq!(with_value.value.get_str("value"), Some("rotated-by-hand"));
        assert_eq!(with_value.metadata.description.as_deref(), Some("updated"));

        let description = f.vault.describe_secret(record.remote_ref.as_deref().unwrap()).await.unwrap();
        assert!(description.version_with_stage(VersionStage::Previous).is_some());
    }

    #[tokio::test]
    async fn test_soft_delete_uses_recovery_window() {
        let f = fixture(scope());
        let record = f.service.create_secret(request("api")).await.unwrap();

        f.service.delete_secret(&record.id, false).await.unwrap();
        let remote = record.remote_ref.as_deref().unwrap();
        assert!(f.vault.contains(remote));
        assert_eq!(f.vault.live_secret_count(), 0);
        assert!(f.service.get_secret(&record.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_delete_keeps_going_when_remote_delete_fails() {
        let f = fixture(scope());
        let record = f.service.create_secret(request("api")).await.unwrap();
        f.vault.fail_next(VaultOperation::Delete, VaultError::backend("throttled"));

        f.service.delete_secret(&record.id, true).await.unwrap();
        assert!(f.store.is_empty());
        assert!(f.vault.contains(record.remote_ref.as_deref().unwrap()));
        assert!(logs_contain("the remote secret is orphaned"));
    }

    #[tokio::test]
    async fn test_rotate_requires_rotation_enabled() {
        let f = fixture(scope());
        let record = f.service.create_secret(request("api")).await.unwrap();

        let err = f.service.rotate_secret(&record.id).await.unwrap_err();
        assert!(matches!(err, KeyturnError::InvalidConfiguration { .. }));
        assert_eq!(f.vault.calls(VaultOperation::Rotate), 0);
    }

    #[tokio::test]
    async fn test_rotate_stamps_last_rotated_at() {
        let f = fixture(scope());
        let mut req = request("rotating");
        req.rotation_enabled = true;
        let record = f.service.create_secret(req).await.unwrap();
        assert!(record.last_rotated_at.is_none());

        let rotated = f.service.rotate_secret(&record.id).await.unwrap();
        assert!(rotated.last_rotated_at.is_some());

        let description = f.vault.describe_secret(record.remote_ref.as_deref().unwrap()).await.unwrap();
        assert!(description.version_with_stage(VersionStage::Pending).is_some());
    }

    #[tokio::test]
    async fn test_rotate_failure_leaves_timestamp_unset() {
        let f = fixture(scope());
        let mut req = request("rotating");
        req.rotation_enabled = true;
        let record = f.service.create_secret(req).await.unwrap();
        f.vault.fail_next(VaultOperation::Rotate, VaultError::backend("busy"));

        assert!(f.service.rotate_secret(&record.id).await.is_err());
        assert!(f.service.get_secret(&record.id).await.unwrap().last_rotated_at.is_none());
    }
}
