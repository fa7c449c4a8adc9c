//! Rotation function deployment
//!
//! Drives the provisioning tool that creates or tears down a scope's rotation
//! function. A call validates and marks the scope DEPLOYING or REMOVING, then
//! returns a [`DeploymentTicket`] while the tool runs on a background task;
//! callers poll [`DeploymentService::status`] or await the ticket.
//!
//! At most one transition runs per scope. Within a process a [`DeploymentGuard`]
//! rejects the second caller without touching the database. Across processes
//! the scope row is the lock: a transition starts only by a conditional update
//! of the status and `updated_at` it read, and a DEPLOYING or REMOVING status
//! is left alone until it is older than `stale_after`, after which the holder
//! is presumed dead and the scope may be taken over.

use crate::config::DeploymentConfig;
use crate::deployment_span;
use crate::domain::{BackendScopeConfig, DeploymentStatus, ScopeId};
use crate::errors::{KeyturnError, Result};
use crate::observability::MetricsRecorder;
use crate::storage::{DeploymentClaim, DeploymentUpdate, FunctionRefChange, ScopeConfigStore};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

/// Longest failure message persisted on a scope
const MAX_MESSAGE_CHARS: usize = 2000;

static LOCK_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ID:\s+([0-9a-fA-F-]+)").expect("lock id regex is valid"));

static FUNCTION_ARN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"arn:aws[a-zA-Z-]*:lambda:[a-z0-9-]+:\d{12}:function:[A-Za-z0-9_-]+")
        .expect("function arn regex is valid")
});

/// Which transition is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentOperation {
    Deploy,
    Remove,
}

impl DeploymentOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Remove => "remove",
        }
    }

    fn in_flight_status(&self) -> DeploymentStatus {
        match self {
            Self::Deploy => DeploymentStatus::Deploying,
            Self::Remove => DeploymentStatus::Removing,
        }
    }

    fn success_status(&self) -> DeploymentStatus {
        match self {
            Self::Deploy => DeploymentStatus::Deployed,
            Self::Remove => DeploymentStatus::Idle,
        }
    }

    fn can_start_from(&self, status: DeploymentStatus) -> bool {
        status.is_in_flight()
            || match self {
                Self::Deploy => status.can_start_deploy(),
                Self::Remove => status.can_start_remove(),
            }
    }
}

impl fmt::Display for DeploymentOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One invocation of the provisioning tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionAction {
    Deploy,
    Remove,
    /// Release a state lock left by an earlier run
    Unlock { lock_id: String },
}

impl From<DeploymentOperation> for ProvisionAction {
    fn from(operation: DeploymentOperation) -> Self {
        match operation {
            DeploymentOperation::Deploy => Self::Deploy,
            DeploymentOperation::Remove => Self::Remove,
        }
    }
}

/// Captured output of a successful run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Why a run failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisionError {
    #[error("provisioning command exited with status {status:?}: {output}")]
    Failed { status: Option<i32>, output: String },

    #[error("provisioning command timed out after {seconds}s")]
    TimedOut { seconds: u64 },

    #[error("provisioning command could not be started: {message}")]
    Spawn { message: String },
}

impl ProvisionError {
    /// Text to scan for the lock sentinel
    pub fn output(&self) -> &str {
        match self {
            Self::Failed { output, .. } => output.as_str(),
            _ => "",
        }
    }
}

/// Runs the provisioning tool for a scope
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn run(
        &self,
        scope: &BackendScopeConfig,
        action: &ProvisionAction,
    ) -> std::result::Result<CommandOutput, ProvisionError>;
}

/// Runs the configured program as a subprocess with the scope's credentials in
/// its environment and one tool workspace per scope
#[derive(Debug, Clone)]
pub struct CommandProvisioner {
    config: DeploymentConfig,
}

impl CommandProvisioner {
    pub fn new(config: DeploymentConfig) -> Self {
        Self { config }
    }

    fn args_for(&self, action: &ProvisionAction) -> Vec<String> {
        match action {
            ProvisionAction::Deploy => self.config.deploy_args.clone(),
            ProvisionAction::Remove => self.config.remove_args.clone(),
            ProvisionAction::Unlock { lock_id } => {
                let mut args = self.config.unlock_args.clone();
                args.push(lock_id.clone());
                args
            }
        }
    }
}

/// Workspace name derived from a scope id, restricted to `[A-Za-z0-9_-]`
pub fn workspace_name(scope_id: &ScopeId) -> String {
    let name: String = scope_id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("keyturn-{}", name)
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn run(
        &self,
        scope: &BackendScopeConfig,
        action: &ProvisionAction,
    ) -> std::result::Result<CommandOutput, ProvisionError> {
        let credentials = scope.usable_credentials().ok_or_else(|| ProvisionError::Spawn {
            message: format!("scope '{}' has no vault credentials", scope.scope_id),
        })?;
        let args = self.args_for(action);

        let mut command = tokio::process::Command::new(&self.config.program);
        command
            .args(&args)
            .current_dir(&self.config.working_dir)
            .env("AWS_ACCESS_KEY_ID", &credentials.access_key_id)
            .env("AWS_SECRET_ACCESS_KEY", credentials.secret_access_key.expose_secret())
            .env("AWS_REGION", &scope.default_region)
            .env("AWS_DEFAULT_REGION", &scope.default_region)
            .env("TF_WORKSPACE", workspace_name(&scope.scope_id))
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_VAR_scope_id", scope.scope_id.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        tracing::debug!(program = %self.config.program, ?args, "Running provisioning command");

        let timeout = self.config.command_timeout();
        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| ProvisionError::TimedOut { seconds: timeout.as_secs() })?
            .map_err(|e| ProvisionError::Spawn { message: e.to_string() })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            Err(ProvisionError::Failed {
                status: output.status.code(),
                output: format!("{}\n{}", stderr.trim(), stdout.trim()),
            })
        }
    }
}

/// Per-scope mutual exclusion held in process memory
#[derive(Debug, Clone, Default)]
pub struct DeploymentGuard {
    active: Arc<DashMap<ScopeId, DeploymentOperation>>,
}

impl DeploymentGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the scope; `None` when a transition is already running
    pub fn try_acquire(
        &self,
        scope_id: &ScopeId,
        operation: DeploymentOperation,
    ) -> Option<DeploymentPermit> {
        match self.active.entry(scope_id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(operation);
                Some(DeploymentPermit { active: self.active.clone(), scope_id: scope_id.clone() })
            }
        }
    }

    /// Operation currently holding the scope
    pub fn active(&self, scope_id: &ScopeId) -> Option<DeploymentOperation> {
        self.active.get(scope_id).map(|entry| *entry.value())
    }
}

/// Releases the scope when dropped
#[derive(Debug)]
pub struct DeploymentPermit {
    active: Arc<DashMap<ScopeId, DeploymentOperation>>,
    scope_id: ScopeId,
}

impl Drop for DeploymentPermit {
    fn drop(&mut self) {
        self.active.remove(&self.scope_id);
    }
}

/// Handle to an accepted transition
#[derive(Debug)]
pub struct DeploymentTicket {
    pub scope_id: ScopeId,
    pub operation: DeploymentOperation,
    handle: JoinHandle<DeploymentStatus>,
}

impl DeploymentTicket {
    /// Wait for the background work and return the final status
    pub async fn wait(self) -> Result<DeploymentStatus> {
        self.handle
            .await
            .map_err(|e| KeyturnError::internal(format!("Deployment task failed: {}", e)))
    }
}

/// Polled view of a scope's deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentState {
    pub scope_id: ScopeId,
    pub status: DeploymentStatus,
    pub message: Option<String>,
    pub rotation_function_ref: Option<String>,
    /// Operation running in this process, if any
    pub active: Option<DeploymentOperation>,
}

/// Output parsing and takeover settings
#[derive(Debug, Clone)]
pub struct DeploymentSettings {
    pub lock_sentinel: String,
    pub output_key: String,
    /// Age after which an in-flight status is presumed abandoned
    pub stale_after: Duration,
}

impl From<&DeploymentConfig> for DeploymentSettings {
    fn from(config: &DeploymentConfig) -> Self {
        // a transition runs the tool at most three times (run, unlock, retry)
        let stale_after = config.command_timeout() * 3 + Duration::from_secs(60);
        Self {
            lock_sentinel: config.lock_sentinel.clone(),
            output_key: config.output_key.clone(),
            stale_after,
        }
    }
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self::from(&DeploymentConfig::default())
    }
}

/// Asynchronous deploy/remove state machine
#[derive(Clone)]
pub struct DeploymentService {
    scopes: Arc<dyn ScopeConfigStore>,
    provisioner: Arc<dyn Provisioner>,
    guard: DeploymentGuard,
    settings: Arc<DeploymentSettings>,
    metrics: MetricsRecorder,
}

impl DeploymentService {
    pub fn new(
        scopes: Arc<dyn ScopeConfigStore>,
        provisioner: Arc<dyn Provisioner>,
        settings: DeploymentSettings,
    ) -> Self {
        Self {
            scopes,
            provisioner,
            guard: DeploymentGuard::new(),
            settings: Arc::new(settings),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = metrics;
        self
    }

    /// Provision the scope's rotation function
    pub async fn deploy(&self, scope_id: &ScopeId) -> Result<DeploymentTicket> {
        self.begin(scope_id, DeploymentOperation::Deploy).await
    }

    /// Tear down the scope's rotation function
    pub async fn remove(&self, scope_id: &ScopeId) -> Result<DeploymentTicket> {
        self.begin(scope_id, DeploymentOperation::Remove).await
    }

    pub async fn status(&self, scope_id: &ScopeId) -> Result<DeploymentState> {
        let scope = self.load_scope(scope_id).await?;
        Ok(DeploymentState {
            active: self.guard.active(scope_id),
            scope_id: scope.scope_id,
            status: scope.deployment_status,
            message: scope.deployment_message,
            rotation_function_ref: scope.rotation_function_ref,
        })
    }

    async fn load_scope(&self, scope_id: &ScopeId) -> Result<BackendScopeConfig> {
        self.scopes
            .get(scope_id)
            .await?
            .ok_or_else(|| KeyturnError::not_found("Scope", scope_id.as_str()))
    }

    async fn begin(
        &self,
        scope_id: &ScopeId,
        operation: DeploymentOperation,
    ) -> Result<DeploymentTicket> {
        let permit = self.guard.try_acquire(scope_id, operation).ok_or_else(|| {
            KeyturnError::conflict(
                format!("A deployment or removal is already running for scope '{}'", scope_id),
                "Deployment",
            )
        })?;

        let scope = self.load_scope(scope_id).await?;
        if scope.usable_credentials().is_none() {
            return Err(KeyturnError::invalid_configuration(format!(
                "Scope '{}' has no vault credentials configured",
                scope_id
            )));
        }
        if !operation.can_start_from(scope.deployment_status) {
            return Err(KeyturnError::conflict(
                format!(
                    "Cannot {} scope '{}' while it is {}",
                    operation, scope_id, scope.deployment_status
                ),
                "Deployment",
            ));
        }
        if scope.deployment_status.is_in_flight() {
            let fresh = (Utc::now() - scope.updated_at)
                .to_std()
                .map_or(true, |age| age < self.settings.stale_after);
            if fresh {
                return Err(KeyturnError::conflict(
                    format!(
                        "Scope '{}' has been {} since {}; another instance may still be working on it",
                        scope_id, scope.deployment_status, scope.updated_at
                    ),
                    "Deployment",
                ));
            }
            warn!(
                scope_id = %scope_id,
                status = %scope.deployment_status,
                since = %scope.updated_at,
                "Taking over a stale in-flight deployment status"
            );
        }

        let claimed = self
            .scopes
            .claim_deployment(scope_id, DeploymentClaim::of(&scope), operation.in_flight_status())
            .await?;
        if !claimed {
            return Err(KeyturnError::conflict(
                format!("Scope '{}' was changed by a concurrent deployment or removal", scope_id),
                "Deployment",
            ));
        }
        info!(scope_id = %scope_id, %operation, "Deployment accepted");

        let service = self.clone();
        let span = deployment_span!(operation, scope_id);
        let handle = tokio::spawn(
            async move {
                let status = service.execute(&scope, operation).await;
                drop(permit);
                status
            }
            .instrument(span),
        );

        Ok(DeploymentTicket { scope_id: scope_id.clone(), operation, handle })
    }

    /// Background half of a transition. Always writes a terminal status.
    async fn execute(
        &self,
        scope: &BackendScopeConfig,
        operation: DeploymentOperation,
    ) -> DeploymentStatus {
        let started = Instant::now();

        let outcome = match self.provision(scope, &ProvisionAction::from(operation)).await {
            Ok(output) => match operation {
                DeploymentOperation::Deploy => {
                    parse_function_ref(&self.settings.output_key, &output.stdout)
                        .map(FunctionRefChange::Set)
                }
                DeploymentOperation::Remove => Ok(FunctionRefChange::Clear),
            },
            Err(e) => Err(e),
        };

        let update = match outcome {
            Ok(change) => {
                info!(?change, "Provisioning finished");
                DeploymentUpdate::status(operation.success_status()).with_function_ref(change)
            }
            Err(e) => {
                error!(error = %e, "Provisioning failed");
                DeploymentUpdate::status(DeploymentStatus::Failed)
                    .with_message(tail(&e.to_string(), MAX_MESSAGE_CHARS))
            }
        };
        let final_status = update.status;

        if let Err(e) = self.scopes.record_deployment(&scope.scope_id, update).await {
            error!(error = %e, status = %final_status, "Failed to persist final deployment status");
        }
        self.metrics.record_deployment(
            operation.as_str(),
            final_status.as_str(),
            started.elapsed().as_secs_f64(),
        );
        final_status
    }

    /// Run the tool, recovering once from a held state lock
    async fn provision(
        &self,
        scope: &BackendScopeConfig,
        action: &ProvisionAction,
    ) -> Result<CommandOutput> {
        let failure = match self.provisioner.run(scope, action).await {
            Ok(output) => return Ok(output),
            Err(failure) => failure,
        };

        if !failure.output().contains(&self.settings.lock_sentinel) {
            return Err(KeyturnError::provisioning(failure.to_string()));
        }

        let Some(lock_id) = extract_lock_id(failure.output()) else {
            self.metrics.record_lock_recovery(false);
            return Err(KeyturnError::provisioning(format!(
                "State lock is held but its id could not be found: {}",
                failure
            )));
        };

        warn!(lock_id = %lock_id, "State lock held by a previous run, unlocking");
        if let Err(e) =
            self.provisioner.run(scope, &ProvisionAction::Unlock { lock_id: lock_id.clone() }).await
        {
            self.metrics.record_lock_recovery(false);
            return Err(KeyturnError::provisioning(format!(
                "Failed to release state lock {}: {}",
                lock_id, e
            )));
        }
        self.metrics.record_lock_recovery(true);

        self.provisioner.run(scope, action).await.map_err(|e| {
            KeyturnError::provisioning(format!("Retry after releasing state lock failed: {}", e))
        })
    }
}

/// Lock id reported alongside the lock sentinel
pub fn extract_lock_id(output: &str) -> Option<String> {
    LOCK_ID.captures(output).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
}

/// Rotation function reference from the tool's output: the `output_key`
/// variable if printed, otherwise the first function ARN in the text
pub fn parse_function_ref(output_key: &str, stdout: &str) -> Result<String> {
    let keyed = Regex::new(&format!(r#"(?m)^\s*{}\s*=\s*"?([^"\s]+)"?"#, regex::escape(output_key)))
        .map_err(|e| KeyturnError::internal(format!("Invalid output key pattern: {}", e)))?;

    keyed
        .captures(stdout)
        .and_then(|c| c.get(1))
        .or_else(|| FUNCTION_ARN.find(stdout))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            KeyturnError::provisioning(format!(
                "Provisioning output does not contain '{}' or a function ARN",
                output_key
            ))
        })
}

/// Last `max_chars` characters of `text`
fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

/// Poll `status` until the scope leaves DEPLOYING/REMOVING or `timeout` passes
pub async fn wait_until_settled(
    service: &DeploymentService,
    scope_id: &ScopeId,
    interval: Duration,
    timeout: Duration,
) -> Result<DeploymentState> {
    let deadline = Instant::now() + timeout;
    loop {
        let state = service.status(scope_id).await?;
        if !state.status.is_in_flight() || Instant::now() >= deadline {
            return Ok(state);
        }
        tokio::time::sleep(interval).await;
    }
}
