//! Wiring of stores, vault factory and services from configuration
//!
//! [`Engine`] is what the binary drives: one secret service, one deployment
//! service and one rotation handler sharing the same stores and metrics.

use crate::config::{AppConfig, VaultBackend, VaultConfig};
use crate::errors::Result;
use crate::observability::MetricsRecorder;
use crate::rotation::{RotationHandler, RotationStrategyRegistry};
use crate::secrets::{InMemoryVault, InMemoryVaultFactory, VaultClientFactory};
use crate::services::{
    CommandProvisioner, DeploymentService, DeploymentSettings, SecretEncryption, SecretService,
    SecretServiceOptions,
};
use crate::storage::{
    create_pool, DbPool, ScopeConfigStore, SecretRecordStore, SqlxScopeRepository,
    SqlxSecretRepository,
};
use std::sync::Arc;
use tracing::info;

/// Everything a command needs
pub struct Engine {
    pub pool: DbPool,
    pub scopes: Arc<dyn ScopeConfigStore>,
    pub secrets: SecretService,
    pub deployments: DeploymentService,
    pub rotation: RotationHandler,
}

impl Engine {
    /// Connect to the database and build every service
    pub async fn build(config: &AppConfig, metrics: MetricsRecorder) -> Result<Self> {
        let pool = create_pool(&config.database).await?;
        let encryption = Arc::new(SecretEncryption::new(&config.encryption)?);

        let secret_store: Arc<dyn SecretRecordStore> =
            Arc::new(SqlxSecretRepository::new(pool.clone(), encryption.clone()));
        let scopes: Arc<dyn ScopeConfigStore> =
            Arc::new(SqlxScopeRepository::new(pool.clone(), encryption));
        let vaults = vault_factory(&config.vault)?;

        let secrets = SecretService::new(secret_store.clone(), scopes.clone(), vaults.clone())
            .with_options(SecretServiceOptions {
                recovery_window_days: config.vault.recovery_window_days,
                ..SecretServiceOptions::default()
            })
            .with_metrics(metrics.clone());

        let deployments = DeploymentService::new(
            scopes.clone(),
            Arc::new(CommandProvisioner::new(config.deployment.clone())),
            DeploymentSettings::from(&config.deployment),
        )
        .with_metrics(metrics.clone());

        let registry = RotationStrategyRegistry::with_builtin_strategies(config.vault.request_timeout());
        info!(strategies = ?registry.registered_types(), "Rotation strategies available");
        let rotation = RotationHandler::new(secret_store, scopes.clone(), vaults, Arc::new(registry))
            .with_metrics(metrics);

        Ok(Self { pool, scopes, secrets, deployments, rotation })
    }
}

/// Vault factory for the configured backend
pub fn vault_factory(config: &VaultConfig) -> Result<Arc<dyn VaultClientFactory>> {
    match config.backend {
        VaultBackend::Memory => {
            info!("Using in-process vault; remote secrets do not outlive this process");
            Ok(Arc::new(InMemoryVaultFactory::new(Arc::new(InMemoryVault::new(
                config.default_region.clone(),
            )))))
        }
        #[cfg(feature = "aws")]
        VaultBackend::Aws => Ok(Arc::new(crate::secrets::AwsVaultClientFactory::new(
            config.endpoint_url.clone(),
            config.request_timeout(),
        ))),
        #[cfg(not(feature = "aws"))]
        VaultBackend::Aws => Err(crate::errors::KeyturnError::config(
            "Vault backend 'aws' requires building with the `aws` feature",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_always_available() {
        assert!(vault_factory(&VaultConfig::default()).is_ok());
    }

    #[test]
    fn test_aws_backend_follows_feature() {
        let config = VaultConfig { backend: VaultBackend::Aws, ..VaultConfig::default() };
        assert_eq!(vault_factory(&config).is_ok(), cfg!(feature = "aws"));
    }
}
