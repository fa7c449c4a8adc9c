//! # Structured Logging
//!
//! Subscriber setup and span macros for rotation and deployment work.
//!
//! `RUST_LOG` wins over the configured level when set. In JSON mode every
//! event carries its span fields, so a rotation cycle can be followed by
//! `request_token` and a deployment by `scope_id`.

use crate::config::ObservabilityConfig;
use crate::errors::{KeyturnError, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_new(&config.log_level),
    }
    .map_err(|e| KeyturnError::config(format!("Invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json_logging {
        registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(false))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    installed.map_err(|e| {
        KeyturnError::config_with_source("Failed to install tracing subscriber", Box::new(e))
    })
}

/// Create a tracing span for one rotation step.
///
/// ```rust,ignore
/// let span = rotation_span!(RotationStep::SetSecret, "arn:...:db-1", request_token = %token);
/// ```
#[macro_export]
macro_rules! rotation_span {
    ($step:expr, $secret_id:expr) => {
        tracing::info_span!(
            "rotation_step",
            step = %$step,
            secret_id = %$secret_id,
            operation_id = %uuid::Uuid::new_v4(),
            request_token = tracing::field::Empty
        )
    };
    ($step:expr, $secret_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "rotation_step",
            step = %$step,
            secret_id = %$secret_id,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for a background deployment or removal
#[macro_export]
macro_rules! deployment_span {
    ($operation:expr, $scope_id:expr) => {
        tracing::info_span!(
            "deployment",
            operation = %$operation,
            scope_id = %$scope_id,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $scope_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "deployment",
            operation = %$operation,
            scope_id = %$scope_id,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Log configuration at startup. Never logs keys or credentials.
pub fn log_config_info(config: &crate::config::AppConfig) {
    tracing::info!(
        database = %crate::storage::pool::sanitize_url(&config.database.url),
        vault_backend = ?config.vault.backend,
        default_region = %config.vault.default_region,
        recovery_window_days = config.vault.recovery_window_days,
        provisioning_program = %config.deployment.program,
        metrics_enabled = config.observability.metrics_addr.is_some(),
        "keyturn configuration"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RotationStep;

    #[test]
    fn test_macros_compile() {
        let _span = rotation_span!(RotationStep::CreateSecret, "arn:secret:db-1");
        let _span = rotation_span!(RotationStep::FinishSecret, "arn:secret:db-1", request_token = "t-1");
        let _span = deployment_span!("deploy", "tenant-a");
        let _span = deployment_span!("remove", "tenant-a", attempt = 2);
    }

    #[test]
    fn test_invalid_level_is_config_error() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config =
            ObservabilityConfig { log_level: "keyturn=[".to_string(), ..Default::default() };
        let err = init_logging(&config).unwrap_err();
        assert!(matches!(err, KeyturnError::Config { .. }));
    }

    #[test]
    fn test_log_config_info() {
        log_config_info(&crate::config::AppConfig::default());
    }
}
