//! Backend scope configuration
//!
//! One record per tenant/project holding the vault credentials, default region,
//! the rotation function reference and the deployment status of that function.

use crate::domain::ScopeId;
use crate::secrets::SecretString;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Credentials used to build a vault client for a scope
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultCredentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

impl VaultCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<SecretString>) -> Self {
        Self { access_key_id: access_key_id.into(), secret_access_key: secret_access_key.into() }
    }

    /// Both halves present and non-blank
    pub fn is_complete(&self) -> bool {
        !self.access_key_id.trim().is_empty() && !self.secret_access_key.is_empty()
    }
}

impl fmt::Debug for VaultCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key)
            .finish()
    }
}

/// Lifecycle of the rotation function's infrastructure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    #[default]
    Idle,
    Deploying,
    Deployed,
    Removing,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Deploying => "DEPLOYING",
            Self::Deployed => "DEPLOYED",
            Self::Removing => "REMOVING",
            Self::Failed => "FAILED",
        }
    }

    /// A transition is in flight
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Deploying | Self::Removing)
    }

    /// Whether a deployment may start from this status
    pub fn can_start_deploy(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed)
    }

    /// Whether a removal may start from this status
    pub fn can_start_remove(&self) -> bool {
        matches!(self, Self::Deployed | Self::Failed | Self::Idle)
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(Self::Idle),
            "DEPLOYING" => Ok(Self::Deploying),
            "DEPLOYED" => Ok(Self::Deployed),
            "REMOVING" => Ok(Self::Removing),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Unknown deployment status: {}", s)),
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-tenant backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendScopeConfig {
    pub scope_id: ScopeId,
    pub credentials: Option<VaultCredentials>,
    pub default_region: String,
    pub rotation_function_ref: Option<String>,
    pub deployment_status: DeploymentStatus,
    pub deployment_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackendScopeConfig {
    pub fn new(scope_id: ScopeId, default_region: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            scope_id,
            credentials: None,
            default_region: default_region.into(),
            rotation_function_ref: None,
            deployment_status: DeploymentStatus::Idle,
            deployment_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_credentials(mut self, credentials: VaultCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_rotation_function(mut self, rotation_function_ref: impl Into<String>) -> Self {
        self.rotation_function_ref = Some(rotation_function_ref.into());
        self
    }

    /// Credentials if both halves are configured
    pub fn usable_credentials(&self) -> Option<&VaultCredentials> {
        self.credentials.as_ref().filter(|c| c.is_complete())
    }

    /// Rotation function reference if set and non-blank
    pub fn rotation_function(&self) -> Option<&str> {
        self.rotation_function_ref.as_deref().filter(|r| !r.trim().is_empty())
    }
}
