//! # Configuration Management
//!
//! Configuration is read from `KEYTURN__*` environment variables, with a
//! `.env` file loaded first when present. Nested keys use a double underscore:
//! `KEYTURN__DATABASE__URL`, `KEYTURN__VAULT__DEFAULT_REGION`,
//! `KEYTURN__ENCRYPTION__MASTER_KEY`. List values (`deploy_args`,
//! `remove_args`, `unlock_args`) are space separated.

pub mod settings;

pub use settings::{
    AppConfig, DatabaseConfig, DeploymentConfig, EncryptionSettings, ObservabilityConfig,
    VaultBackend, VaultConfig,
};

use crate::errors::Result;

/// Environment prefix for every setting
pub const ENV_PREFIX: &str = "KEYTURN";

const LIST_KEYS: [&str; 3] =
    ["deployment.deploy_args", "deployment.remove_args", "deployment.unlock_args"];

impl AppConfig {
    /// Load `.env`, then the process environment, then validate
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_source(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Build from an explicit environment source; used by tests to avoid
    /// touching process state
    pub fn from_source(environment: config::Environment) -> Result<Self> {
        let mut environment = environment
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(" ");
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }

        let config: AppConfig =
            config::Config::builder().add_source(environment).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    const KEY: &str = "QkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkI=";

    #[test]
    fn test_env_overrides_defaults() {
        let config = AppConfig::from_source(source(&[
            ("KEYTURN__DATABASE__URL", "postgresql://u:p@db:5432/keyturn"),
            ("KEYTURN__DATABASE__MAX_CONNECTIONS", "20"),
            ("KEYTURN__VAULT__DEFAULT_REGION", "eu-west-1"),
            ("KEYTURN__ENCRYPTION__MASTER_KEY", KEY),
            ("KEYTURN__DEPLOYMENT__DEPLOY_ARGS", "apply -auto-approve"),
        ]))
        .unwrap();

        assert_eq!(config.database.url, "postgresql://u:p@db:5432/keyturn");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.vault.default_region, "eu-west-1");
        assert_eq!(config.vault.recovery_window_days, 30);
        assert_eq!(config.deployment.deploy_args, vec!["apply", "-auto-approve"]);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = AppConfig::from_source(source(&[
            ("KEYTURN__ENCRYPTION__MASTER_KEY", KEY),
            ("KEYTURN__VAULT__RECOVERY_WINDOW_DAYS", "90"),
        ]));
        assert!(result.is_err());
    }
}
