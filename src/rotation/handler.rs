//! Rotation function entry point
//!
//! The vault invokes the rotation function once per step with a
//! [`RotationEvent`]. The handler resolves the owning scope, checks the
//! token against the secret's version stages and dispatches to the strategy
//! registered for the secret's credential type.

use super::registry::RotationStrategyRegistry;
use super::strategy::RotationContext;
use crate::domain::{RotationEvent, RotationStep, SecretRecord, SecretType, VersionStage};
use crate::errors::{KeyturnError, Result};
use crate::observability::MetricsRecorder;
use crate::secrets::{
    SecretDescription, SecretVaultClient, VaultClientFactory, VaultOperation, SECRET_TYPE_TAG,
};
use crate::storage::{ScopeConfigStore, SecretRecordStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Runs rotation steps against the vault of the secret's scope
pub struct RotationHandler {
    secrets: Arc<dyn SecretRecordStore>,
    scopes: Arc<dyn ScopeConfigStore>,
    vaults: Arc<dyn VaultClientFactory>,
    registry: Arc<RotationStrategyRegistry>,
    metrics: MetricsRecorder,
}

impl RotationHandler {
    pub fn new(
        secrets: Arc<dyn SecretRecordStore>,
        scopes: Arc<dyn ScopeConfigStore>,
        vaults: Arc<dyn VaultClientFactory>,
        registry: Arc<RotationStrategyRegistry>,
    ) -> Self {
        Self { secrets, scopes, vaults, registry, metrics: MetricsRecorder::new() }
    }

    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = metrics;
        self
    }

    /// Handle one rotation step
    pub async fn handle(&self, event: &RotationEvent) -> Result<()> {
        let span = crate::rotation_span!(event.step, event.secret_id);
        span.record("request_token", event.request_token.as_str());
        self.handle_inner(event).instrument(span).await
    }

    async fn handle_inner(&self, event: &RotationEvent) -> Result<()> {
        let record = self.secrets.find_by_remote_ref(&event.secret_id).await?.ok_or_else(|| {
            KeyturnError::not_found("Secret", event.secret_id.clone())
        })?;
        let vault = self.vault_for(&record).await?;

        let description = self
            .metrics
            .time_vault_call(VaultOperation::Describe.as_str(), vault.describe_secret(&event.secret_id))
            .await
            .map_err(|e| KeyturnError::upstream("describe secret", e))?;

        if !description.rotation_enabled {
            return Err(KeyturnError::invalid_configuration(format!(
                "Rotation is not enabled for {}",
                description.name
            )));
        }
        let Some(stages) = description.stages_of(&event.request_token) else {
            return Err(KeyturnError::not_found(
                "Secret version",
                format!("{}@{}", description.name, event.request_token),
            ));
        };
        if stages.contains(&VersionStage::Current) {
            info!("Token already holds CURRENT; nothing to do");
            return Ok(());
        }
        if !stages.contains(&VersionStage::Pending) {
            return Err(KeyturnError::conflict(
                format!(
                    "Version {} of {} is not staged for rotation",
                    event.request_token, description.name
                ),
                "SecretVersion",
            ));
        }

        let secret_type = resolve_type(&description, &record);
        let strategy = self.registry.get(secret_type)?;
        let ctx = RotationContext::new(vault.as_ref(), &event.secret_id, &event.request_token, &self.metrics);

        let started = Instant::now();
        let result = match event.step {
            RotationStep::CreateSecret => {
                if ctx.pending_value().await?.is_some() {
                    info!("Pending value already stored for token; skipping createSecret");
                    Ok(())
                } else {
                    let current = ctx.current_value().await?;
                    strategy.create_secret(&ctx, &current).await
                }
            }
            RotationStep::SetSecret => {
                let pending = ctx.require_pending_value().await?;
                let current = ctx.current_value().await?;
                strategy.set_secret(&ctx, &pending, &current).await
            }
            RotationStep::TestSecret => {
                let pending = ctx.require_pending_value().await?;
                strategy.test_secret(&ctx, &pending).await
            }
            RotationStep::FinishSecret => strategy.finish_secret(&ctx, &description).await,
        };

        self.metrics.record_rotation_step(
            event.step.as_str(),
            secret_type.as_str(),
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );

        match &result {
            Ok(()) => info!(secret_type = %secret_type, "Rotation step completed"),
            Err(e) => warn!(secret_type = %secret_type, error = %e, "Rotation step failed"),
        }
        result?;

        if event.step == RotationStep::FinishSecret {
            if let Err(e) = self.secrets.mark_rotated(&record.id, Utc::now()).await {
                warn!(secret_id = %record.id, error = %e, "Failed to record rotation time");
            }
        }
        Ok(())
    }

    async fn vault_for(&self, record: &SecretRecord) -> Result<Arc<dyn SecretVaultClient>> {
        let scope = self
            .scopes
            .get(&record.scope_id)
            .await?
            .ok_or_else(|| KeyturnError::not_found("BackendScope", record.scope_id.to_string()))?;
        let credentials = scope.usable_credentials().ok_or_else(|| {
            KeyturnError::invalid_configuration(format!(
                "Scope '{}' has no vault credentials configured",
                scope.scope_id
            ))
        })?;
        self.vaults
            .client(credentials, &record.region)
            .await
            .map_err(|e| KeyturnError::upstream("build vault client", e))
    }
}

/// Credential type from the vault's tag, falling back to local metadata
fn resolve_type(description: &SecretDescription, record: &SecretRecord) -> SecretType {
    match description.tag(SECRET_TYPE_TAG).map(str::parse::<SecretType>) {
        Some(Ok(tagged)) => tagged,
        Some(Err(e)) => {
            warn!(error = %e, fallback = %record.secret_type, "Unreadable secret type tag");
            record.secret_type
        }
        None => {
            debug!(fallback = %record.secret_type, "Secret has no type tag");
            record.secret_type
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BackendScopeConfig, CreateSecretRequest, ScopeId, StorageMode, VaultCredentials,
    };
    use crate::rotation::GenericSecretStrategy;
    use crate::secrets::{InMemoryVault, InMemoryVaultFactory, SecretPayload};
    use crate::services::SecretService;
    use crate::storage::{InMemoryScopeStore, InMemorySecretStore};
    use std::time::Duration;

    struct Fixture {
        handler: RotationHandler,
        vault: Arc<InMemoryVault>,
        arn: String,
    }

    async fn fixture(secret_type: SecretType, registry: RotationStrategyRegistry) -> Fixture {
        let vault = Arc::new(InMemoryVault::default());
        let secrets = Arc::new(InMemorySecretStore::new());
        let scopes = Arc::new(InMemoryScopeStore::with_scopes([BackendScopeConfig::new(
            ScopeId::from_str_unchecked("tenant"),
            "us-east-1",
        )
        .with_credentials(VaultCredentials::new("AKIA1", "secret"))
        .with_rotation_function("arn:fn:rotate")]));
        let factory = Arc::new(InMemoryVaultFactory::new(vault.clone()));

        let record = SecretService::new(secrets.clone(), scopes.clone(), factory.clone())
            .create_secret(CreateSecretRequest {
                scope_id: ScopeId::from_str_unchecked("tenant"),
                name: "api-token".into(),
                secret_type,
                value: SecretPayload::single("value", "first"),
                description: None,
                storage_mode: StorageMode::Remote,
                rotation_enabled: true,
                rotation_schedule: None,
                region: None,
            })
            .await
            .unwrap();

        Fixture {
            handler: RotationHandler::new(secrets, scopes, factory, Arc::new(registry)),
            vault,
            arn: record.remote_ref.unwrap(),
        }
    }

    fn generic_registry() -> RotationStrategyRegistry {
        let mut registry = RotationStrategyRegistry::new();
        registry.register(Arc::new(GenericSecretStrategy::new()));
        registry
    }

    async fn current(f: &Fixture) -> String {
        let value = f.vault.get_current_value(&f.arn).await.unwrap().decode().unwrap();
        value.get_str("value").unwrap().to_string()
    }

    #[tokio::test]
    async fn test_four_steps_promote_new_value() {
        let f = fixture(SecretType::GenericSecret, generic_registry()).await;
        let token = f.vault.rotate_secret(&f.arn).await.unwrap();

        for step in [
            RotationStep::CreateSecret,
            RotationStep::SetSecret,
            RotationStep::TestSecret,
            RotationStep::FinishSecret,
        ] {
            f.handler.handle(&RotationEvent::new(step, &f.arn, &token)).await.unwrap();
        }

        assert_ne!(current(&f).await, "first");
        let description = f.vault.describe_secret(&f.arn).await.unwrap();
        assert_eq!(description.version_with_stage(VersionStage::Current), Some(token.as_str()));
        assert!(description.version_with_stage(VersionStage::Previous).is_some());
    }

    #[tokio::test]
    async fn test_create_step_is_idempotent() {
        let f = fixture(SecretType::GenericSecret, generic_registry()).await;
        let token = f.vault.rotate_secret(&f.arn).await.unwrap();
        let event = RotationEvent::new(RotationStep::CreateSecret, &f.arn, &token);

        f.handler.handle(&event).await.unwrap();
        let puts = f.vault.calls(VaultOperation::PutValue);
        f.handler.handle(&event).await.unwrap();
        assert_eq!(f.vault.calls(VaultOperation::PutValue), puts);
    }

    #[tokio::test]
    async fn test_finish_without_pending_value_fails() {
        let f = fixture(SecretType::GenericSecret, generic_registry()).await;
        let token = f.vault.rotate_secret(&f.arn).await.unwrap();

        let err = f
            .handler
            .handle(&RotationEvent::new(RotationStep::FinishSecret, &f.arn, &token))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(current(&f).await, "first");
    }

    #[tokio::test]
    async fn test_unknown_token_and_unknown_secret() {
        let f = fixture(SecretType::GenericSecret, generic_registry()).await;
        let err = f
            .handler
            .handle(&RotationEvent::new(RotationStep::CreateSecret, &f.arn, "no-such-token"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = f
            .handler
            .handle(&RotationEvent::new(RotationStep::CreateSecret, "arn:missing", "t"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_current_token_is_a_no_op() {
        let f = fixture(SecretType::GenericSecret, generic_registry()).await;
        let description = f.vault.describe_secret(&f.arn).await.unwrap();
        let live = description.version_with_stage(VersionStage::Current).unwrap().to_string();

        let before = f.vault.total_calls();
        f.handler
            .handle(&RotationEvent::new(RotationStep::CreateSecret, &f.arn, &live))
            .await
            .unwrap();
        // describe only
        assert_eq!(f.vault.total_calls(), before + 1);
    }

    #[tokio::test]
    async fn test_unregistered_type_is_configuration_error() {
        let f = fixture(
            SecretType::RdsCredentials,
            RotationStrategyRegistry::with_builtin_strategies(Duration::from_secs(1)),
        )
        .await;
        let token = f.vault.rotate_secret(&f.arn).await.unwrap();

        let mut registry = RotationStrategyRegistry::new();
        registry.register(Arc::new(GenericSecretStrategy::new()));
        let handler = RotationHandler { registry: Arc::new(registry), ..f.handler };

        let err = handler
            .handle(&RotationEvent::new(RotationStep::CreateSecret, &f.arn, &token))
            .await
            .unwrap_err();
        assert!(matches!(err, KeyturnError::InvalidConfiguration { .. }));
    }
}
