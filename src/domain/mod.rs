//! Domain model: secrets, backend scopes and rotation protocol types.

pub mod id;
pub mod rotation;
pub mod scope;
pub mod secret;

pub use id::{ScopeId, SecretId};
pub use rotation::{RotationEvent, RotationStep, VersionStage};
pub use scope::{BackendScopeConfig, DeploymentStatus, VaultCredentials};
pub use secret::{
    CreateSecretRequest, NewSecretRecord, RotationSchedule, SecretRecord, SecretType,
    SecretWithValue, StorageMode, UpdateSecretRequest,
};
