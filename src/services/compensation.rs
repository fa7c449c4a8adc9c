//! Compensating actions for multi-system writes
//!
//! A lifecycle operation that mutates the vault before the local store records
//! each undo step as it goes. When a later step fails the log is unwound in
//! reverse order. Unwinding is best effort: failures are logged and returned
//! as outcomes but never replace the error that triggered the unwind.

use crate::observability::MetricsRecorder;
use crate::secrets::{DeletionMode, SecretVaultClient, VaultError, VaultOperation};
use std::fmt;
use tracing::{error, info, warn};

/// A named undo step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Force-delete a remote secret created earlier in the operation
    DeleteRemoteSecret { remote_ref: String },
}

impl Compensation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeleteRemoteSecret { .. } => "delete_remote_secret",
        }
    }

    async fn run(
        &self,
        vault: &dyn SecretVaultClient,
        metrics: &MetricsRecorder,
    ) -> Result<(), VaultError> {
        match self {
            Self::DeleteRemoteSecret { remote_ref } => {
                let deleted = metrics
                    .time_vault_call(
                        VaultOperation::Delete.as_str(),
                        vault.delete_secret(remote_ref, DeletionMode::Force),
                    )
                    .await;
                match deleted {
                    Err(e) if e.is_not_found() => Ok(()),
                    other => other,
                }
            }
        }
    }
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteRemoteSecret { remote_ref } => write!(f, "delete remote secret {}", remote_ref),
        }
    }
}

/// Result of running one compensation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationOutcome {
    pub compensation: Compensation,
    pub error: Option<VaultError>,
}

impl CompensationOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Undo steps recorded so far, run last-in first-out
#[derive(Debug, Default)]
pub struct CompensationLog {
    steps: Vec<Compensation>,
}

impl CompensationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, compensation: Compensation) {
        self.steps.push(compensation);
    }

    pub fn steps(&self) -> &[Compensation] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The operation completed; nothing will be undone
    pub fn commit(mut self) {
        self.steps.clear();
    }

    /// Run every recorded step in reverse order and drain the log
    pub async fn unwind(
        &mut self,
        vault: &dyn SecretVaultClient,
        metrics: &MetricsRecorder,
    ) -> Vec<CompensationOutcome> {
        let mut outcomes = Vec::with_capacity(self.steps.len());

        while let Some(compensation) = self.steps.pop() {
            let result = compensation.run(vault, metrics).await;
            metrics.record_compensation(compensation.name(), result.is_ok());

            match &result {
                Ok(()) => info!(action = %compensation, "Compensation applied"),
                Err(e) => error!(
                    action = %compensation,
                    error = %e,
                    "Compensation failed; remote state may need manual cleanup"
                ),
            }
            outcomes.push(CompensationOutcome { compensation, error: result.err() });
        }

        if outcomes.iter().any(|o| !o.succeeded()) {
            warn!(attempted = outcomes.len(), "Unwind finished with failures");
        }
        outcomes
    }
}
