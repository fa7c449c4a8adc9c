//! # Metrics Collection
//!
//! Counters and histograms for vault calls, rotation steps, compensations and
//! deployments. Recording is always on; the Prometheus listener is only
//! installed when `metrics_addr` is configured.

use crate::config::ObservabilityConfig;
use crate::errors::{KeyturnError, Result};
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}

/// Metrics recorder that tracks application metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    /// Create a new metrics recorder instance
    pub fn new() -> Self {
        Self
    }

    /// Record one vault API call
    pub fn record_vault_call(&self, operation: &str, success: bool, duration: f64) {
        let labels = [("operation", operation.to_string()), ("status", outcome(success).to_string())];
        counter!("keyturn_vault_calls_total", &labels).increment(1);

        let duration_labels = [("operation", operation.to_string())];
        histogram!("keyturn_vault_call_duration_seconds", &duration_labels).record(duration);
    }

    /// Await a vault call and record its outcome and latency
    pub async fn time_vault_call<T, E, F>(&self, operation: &str, call: F) -> std::result::Result<T, E>
    where
        F: Future<Output = std::result::Result<T, E>>,
    {
        let started = Instant::now();
        let result = call.await;
        self.record_vault_call(operation, result.is_ok(), started.elapsed().as_secs_f64());
        result
    }

    /// Record a secret lifecycle operation (create, update, delete, rotate)
    pub fn record_lifecycle(&self, operation: &str, success: bool) {
        let labels = [("operation", operation.to_string()), ("status", outcome(success).to_string())];
        counter!("keyturn_secret_operations_total", &labels).increment(1);
    }

    /// Record one rotation step for a credential type
    pub fn record_rotation_step(&self, step: &str, secret_type: &str, success: bool, duration: f64) {
        let labels = [
            ("step", step.to_string()),
            ("secret_type", secret_type.to_string()),
            ("status", outcome(success).to_string()),
        ];
        counter!("keyturn_rotation_steps_total", &labels).increment(1);

        let duration_labels = [("step", step.to_string())];
        histogram!("keyturn_rotation_step_duration_seconds", &duration_labels).record(duration);
    }

    /// Record a compensating action run after a partial failure
    pub fn record_compensation(&self, action: &str, success: bool) {
        let labels = [("action", action.to_string()), ("status", outcome(success).to_string())];
        counter!("keyturn_compensations_total", &labels).increment(1);
    }

    /// Record a finished deployment or removal
    pub fn record_deployment(&self, operation: &str, final_status: &str, duration: f64) {
        let labels = [("operation", operation.to_string()), ("status", final_status.to_string())];
        counter!("keyturn_deployments_total", &labels).increment(1);

        let duration_labels = [("operation", operation.to_string())];
        histogram!("keyturn_deployment_duration_seconds", &duration_labels).record(duration);
    }

    /// Record a state lock recovery attempt
    pub fn record_lock_recovery(&self, recovered: bool) {
        let labels = [("status", outcome(recovered).to_string())];
        counter!("keyturn_lock_recoveries_total", &labels).increment(1);
    }

    fn describe(&self) {
        describe_counter!("keyturn_vault_calls_total", Unit::Count, "Vault API calls");
        describe_histogram!(
            "keyturn_vault_call_duration_seconds",
            Unit::Seconds,
            "Vault API call latency"
        );
        describe_counter!(
            "keyturn_secret_operations_total",
            Unit::Count,
            "Secret lifecycle operations"
        );
        describe_counter!("keyturn_rotation_steps_total", Unit::Count, "Rotation steps executed");
        describe_histogram!(
            "keyturn_rotation_step_duration_seconds",
            Unit::Seconds,
            "Rotation step latency"
        );
        describe_counter!(
            "keyturn_compensations_total",
            Unit::Count,
            "Compensating actions run after partial failures"
        );
        describe_counter!(
            "keyturn_deployments_total",
            Unit::Count,
            "Finished rotation function deployments and removals"
        );
        describe_histogram!(
            "keyturn_deployment_duration_seconds",
            Unit::Seconds,
            "Rotation function deployment duration"
        );
        describe_counter!(
            "keyturn_lock_recoveries_total",
            Unit::Count,
            "Provisioning state lock recoveries"
        );
    }
}

/// Install the Prometheus exporter if a listener address is configured
pub fn init_metrics(config: &ObservabilityConfig) -> Result<Option<MetricsRecorder>> {
    let Some(metrics_addr) = config.metrics_addr.as_deref() else {
        return Ok(None);
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        KeyturnError::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| {
            KeyturnError::config(format!("Failed to initialize metrics exporter: {}", e))
        })?;

    let recorder = MetricsRecorder::new();
    recorder.describe();

    info!(
        metrics_addr = %metrics_addr,
        service_name = %config.service_name,
        "Metrics collection initialized"
    );
    Ok(Some(recorder))
}
