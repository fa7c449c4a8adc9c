//! Vault capability interface.
//!
//! [`SecretVaultClient`] is a thin interface over the remote secret vault.
//! Clients are built per call by a [`VaultClientFactory`] from an explicit
//! [`VaultCredentials`] value, so no process-wide client state exists.

use super::error::{VaultError, VaultResult};
use super::types::{SecretPayload, SecretString};
use crate::domain::{RotationSchedule, VaultCredentials, VersionStage};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Tag written on every remote secret naming its credential type, read back by
/// the rotation handler to pick a strategy.
pub const SECRET_TYPE_TAG: &str = "keyturn:secret-type";

/// Tag naming the scope that owns a remote secret
pub const SCOPE_TAG: &str = "keyturn:scope";

/// Vault operations, used for metrics labels and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VaultOperation {
    Create,
    Describe,
    GetValue,
    PutValue,
    Delete,
    Rotate,
    EnableRotation,
    RandomValue,
    MoveStage,
}

impl VaultOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create_secret",
            Self::Describe => "describe_secret",
            Self::GetValue => "get_secret_value",
            Self::PutValue => "put_secret_value",
            Self::Delete => "delete_secret",
            Self::Rotate => "rotate_secret",
            Self::EnableRotation => "enable_rotation",
            Self::RandomValue => "get_random_password",
            Self::MoveStage => "update_secret_version_stage",
        }
    }
}

impl fmt::Display for VaultOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request to create a new remote secret with an initial CURRENT version
#[derive(Debug, Clone)]
pub struct CreateRemoteSecret {
    pub name: String,
    pub value: SecretPayload,
    pub description: Option<String>,
    pub tags: BTreeMap<String, String>,
}

/// Identifiers returned after creating a remote secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSecretRef {
    /// Vault identifier (ARN) to persist as `remote_ref`
    pub arn: String,
    pub name: String,
    pub version_id: Option<String>,
}

/// Metadata about a remote secret, without any value
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecretDescription {
    pub arn: String,
    pub name: String,
    pub rotation_enabled: bool,
    pub rotation_function_ref: Option<String>,
    pub tags: BTreeMap<String, String>,
    /// Version id to the stage labels it holds
    pub versions: BTreeMap<String, Vec<VersionStage>>,
    /// Scheduled for deletion
    pub deleted: bool,
}

impl SecretDescription {
    /// Version currently holding `stage`, if any
    pub fn version_with_stage(&self, stage: VersionStage) -> Option<&str> {
        self.versions
            .iter()
            .find(|(_, stages)| stages.contains(&stage))
            .map(|(version, _)| version.as_str())
    }

    /// Stage labels held by `version_id`; `None` if the version is unknown
    pub fn stages_of(&self, version_id: &str) -> Option<&[VersionStage]> {
        self.versions.get(version_id).map(Vec::as_slice)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Which version to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSelector {
    /// Whatever version holds this stage right now
    Stage(VersionStage),
    /// A specific version, optionally required to hold a stage
    Version { version_id: String, stage: Option<VersionStage> },
}

impl ValueSelector {
    pub fn current() -> Self {
        Self::Stage(VersionStage::Current)
    }

    /// The PENDING value written under a rotation token
    pub fn pending(token: impl Into<String>) -> Self {
        Self::Version { version_id: token.into(), stage: Some(VersionStage::Pending) }
    }
}

/// A secret version as returned by the vault, in either text or binary encoding
#[derive(Debug, Clone)]
pub struct VersionedValue {
    pub version_id: String,
    pub stages: Vec<VersionStage>,
    pub text: Option<SecretString>,
    pub binary: Option<Vec<u8>>,
}

impl VersionedValue {
    /// Decode whichever encoding is present
    pub fn decode(&self) -> VaultResult<SecretPayload> {
        match (&self.text, &self.binary) {
            (Some(text), _) => Ok(SecretPayload::decode_text(text.expose_secret())),
            (None, Some(bytes)) => Ok(SecretPayload::decode_binary(bytes)),
            (None, None) => Err(VaultError::backend(format!(
                "version {} carries neither text nor binary data",
                self.version_id
            ))),
        }
    }
}

/// Value write. Without `request_token` the vault mints a version id; with it
/// the write is idempotent for an identical value.
#[derive(Debug, Clone)]
pub struct PutValue {
    pub value: SecretPayload,
    pub request_token: Option<String>,
    /// Stages to attach; empty means CURRENT
    pub stages: Vec<VersionStage>,
}

impl PutValue {
    /// New CURRENT version
    pub fn current(value: SecretPayload) -> Self {
        Self { value, request_token: None, stages: Vec::new() }
    }

    /// PENDING version under a rotation token
    pub fn pending(value: SecretPayload, token: impl Into<String>) -> Self {
        Self { value, request_token: Some(token.into()), stages: vec![VersionStage::Pending] }
    }
}

/// How to delete a remote secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionMode {
    /// Soft delete, recoverable for this many days
    RecoveryWindow { days: u32 },
    /// Immediate, unrecoverable delete
    Force,
}

/// Rotation rule as the vault expects it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationRule {
    pub automatically_after_days: Option<u32>,
    pub schedule_expression: Option<String>,
}

impl From<&RotationSchedule> for RotationRule {
    fn from(schedule: &RotationSchedule) -> Self {
        match schedule {
            RotationSchedule::EveryDays(days) => {
                Self { automatically_after_days: Some(*days), schedule_expression: None }
            }
            RotationSchedule::Expression(expr) => {
                Self { automatically_after_days: None, schedule_expression: Some(expr.clone()) }
            }
        }
    }
}

/// Parameters for the vault's secure random generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomValueSpec {
    pub length: u32,
    pub exclude_characters: String,
    pub exclude_punctuation: bool,
}

impl RandomValueSpec {
    /// Characters that break connection strings or SQL literals
    pub fn database_password() -> Self {
        Self { length: 32, exclude_characters: "/@\"'\\".to_string(), exclude_punctuation: false }
    }

    pub fn generic() -> Self {
        Self { length: 40, exclude_characters: String::new(), exclude_punctuation: true }
    }
}

/// Move a stage label between versions in one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageMove {
    pub stage: VersionStage,
    pub move_to: Option<String>,
    pub remove_from: Option<String>,
}

/// Remote vault capabilities.
///
/// Implementations MUST NOT log secret values.
#[async_trait]
pub trait SecretVaultClient: Send + Sync + fmt::Debug {
    /// Create a secret whose first version holds CURRENT
    async fn create_secret(&self, request: CreateRemoteSecret) -> VaultResult<RemoteSecretRef>;

    /// Existence probe and version/stage metadata
    async fn describe_secret(&self, secret_id: &str) -> VaultResult<SecretDescription>;

    /// Read one version
    async fn get_value(&self, secret_id: &str, selector: ValueSelector)
        -> VaultResult<VersionedValue>;

    /// Read the live CURRENT version
    async fn get_current_value(&self, secret_id: &str) -> VaultResult<VersionedValue> {
        self.get_value(secret_id, ValueSelector::current()).await
    }

    /// Write a new version; returns its version id
    async fn put_value(&self, secret_id: &str, value: PutValue) -> VaultResult<String>;

    async fn delete_secret(&self, secret_id: &str, mode: DeletionMode) -> VaultResult<()>;

    /// Trigger an immediate rotation; returns the rotation's request token
    async fn rotate_secret(&self, secret_id: &str) -> VaultResult<String>;

    /// Attach the rotation function and schedule without rotating now
    async fn enable_rotation(
        &self,
        secret_id: &str,
        rotation_function_ref: &str,
        rule: &RotationRule,
    ) -> VaultResult<()>;

    /// Issue a random value from the vault's secure generator
    async fn random_value(&self, spec: &RandomValueSpec) -> VaultResult<SecretString>;

    /// Move a stage label between versions atomically
    async fn move_version_stage(&self, secret_id: &str, stage_move: StageMove)
        -> VaultResult<()>;
}

/// Builds a vault client from explicit credentials
#[async_trait]
pub trait VaultClientFactory: Send + Sync {
    async fn client(
        &self,
        credentials: &VaultCredentials,
        region: &str,
    ) -> VaultResult<Arc<dyn SecretVaultClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_rule_from_schedule() {
        let rule = RotationRule::from(&RotationSchedule::EveryDays(30));
        assert_eq!(rule.automatically_after_days, Some(30));
        assert!(rule.schedule_expression.is_none());

        let rule = RotationRule::from(&RotationSchedule::Expression("cron(0 4 * * ? *)".into()));
        assert_eq!(rule.schedule_expression.as_deref(), Some("cron(0 4 * * ? *)"));
    }

    #[test]
    fn test_description_stage_lookup() {
        let mut description = SecretDescription::default();
        description.versions.insert("v1".into(), vec![VersionStage::Previous]);
        description.versions.insert("v2".into(), vec![VersionStage::Current]);
        description.versions.insert("t1".into(), vec![VersionStage::Pending]);

        assert_eq!(description.version_with_stage(VersionStage::Current), Some("v2"));
        assert_eq!(description.stages_of("t1"), Some(&[VersionStage::Pending][..]));
        assert!(description.stages_of("missing").is_none());
    }

    #[test]
    fn test_versioned_value_decode_requires_data() {
        let value = VersionedValue {
            version_id: "v1".into(),
            stages: vec![],
            text: None,
            binary: None,
        };
        assert!(value.decode().is_err());
    }
}
