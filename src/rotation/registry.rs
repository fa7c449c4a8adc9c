//! Rotation strategy registry
//!
//! Maps each credential type to the strategy that rotates it. The handler
//! resolves strategies here at dispatch time; adding a credential type means
//! registering one more strategy.

use super::database::{DatabasePasswordStrategy, PostgresTarget};
use super::generic::GenericSecretStrategy;
use super::strategy::RotationStrategy;
use crate::domain::SecretType;
use crate::errors::{KeyturnError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Registry of rotation strategies keyed by credential type
#[derive(Default)]
pub struct RotationStrategyRegistry {
    strategies: HashMap<SecretType, Arc<dyn RotationStrategy>>,
}

impl std::fmt::Debug for RotationStrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationStrategyRegistry")
            .field("strategies", &self.registered_types())
            .finish()
    }
}

impl RotationStrategyRegistry {
    /// Create a registry with no strategies
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every strategy this build can run.
    ///
    /// Relational credentials and generic secrets are always available.
    /// Document-store credentials need the `documentdb` feature and access
    /// keys need the `aws` feature.
    pub fn with_builtin_strategies(connect_timeout: Duration) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GenericSecretStrategy::new()));
        registry.register(Arc::new(DatabasePasswordStrategy::new(
            SecretType::RdsCredentials,
            Arc::new(PostgresTarget::new(connect_timeout)),
        )));

        #[cfg(feature = "documentdb")]
        {
            use super::database::DocumentDbTarget;
            registry.register(Arc::new(DatabasePasswordStrategy::new(
                SecretType::DocumentdbCredentials,
                Arc::new(DocumentDbTarget::new(connect_timeout)),
            )));
        }

        #[cfg(feature = "aws")]
        {
            use super::identity::{AccessKeyStrategy, AwsIamIdentityProvider};
            registry.register(Arc::new(AccessKeyStrategy::new(Arc::new(
                AwsIamIdentityProvider::new(connect_timeout),
            ))));
        }

        registry
    }

    /// Register a strategy, replacing any existing one for the same type
    pub fn register(&mut self, strategy: Arc<dyn RotationStrategy>) {
        let secret_type = strategy.secret_type();
        info!(secret_type = %secret_type, "Registering rotation strategy");
        self.strategies.insert(secret_type, strategy);
    }

    pub fn has_strategy(&self, secret_type: SecretType) -> bool {
        self.strategies.contains_key(&secret_type)
    }

    /// Strategy for `secret_type`
    pub fn get(&self, secret_type: SecretType) -> Result<Arc<dyn RotationStrategy>> {
        self.strategies.get(&secret_type).cloned().ok_or_else(|| {
            KeyturnError::invalid_configuration(format!(
                "No rotation strategy registered for {}",
                secret_type
            ))
        })
    }

    /// Registered types, sorted by name
    pub fn registered_types(&self) -> Vec<SecretType> {
        let mut types: Vec<SecretType> = self.strategies.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_covers_always_available_types() {
        let registry = RotationStrategyRegistry::with_builtin_strategies(Duration::from_secs(5));
        assert!(registry.has_strategy(SecretType::GenericSecret));
        assert!(registry.has_strategy(SecretType::RdsCredentials));
        assert_eq!(
            registry.has_strategy(SecretType::DocumentdbCredentials),
            cfg!(feature = "documentdb")
        );
        assert_eq!(registry.has_strategy(SecretType::AwsApiKey), cfg!(feature = "aws"));
    }

    #[test]
    fn test_builtin_registry_matches_rotatable_types() {
        let registry = RotationStrategyRegistry::with_builtin_strategies(Duration::from_secs(5));
        for secret_type in SecretType::ALL {
            assert_eq!(registry.has_strategy(secret_type), secret_type.supports_rotation());
        }
    }

    #[test]
    fn test_missing_strategy_is_configuration_error() {
        let registry = RotationStrategyRegistry::new();
        let err = registry.get(SecretType::GenericSecret).err().unwrap();
        assert!(matches!(err, KeyturnError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_register_replaces_by_type() {
        let mut registry = RotationStrategyRegistry::new();
        registry.register(Arc::new(GenericSecretStrategy::new()));
        registry.register(Arc::new(GenericSecretStrategy::with_value_key("token")));
        assert_eq!(registry.registered_types(), vec![SecretType::GenericSecret]);
        assert!(format!("{:?}", registry).contains("GenericSecret"));
    }
}
