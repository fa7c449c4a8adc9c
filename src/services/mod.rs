//! Business logic services
//!
//! Services own the ordering of calls across the local store, the remote vault
//! and the provisioning tool. They depend on store and vault traits only.

pub mod compensation;
pub mod deployment_service;
pub mod secret_encryption;
pub mod secret_service;

pub use compensation::{Compensation, CompensationLog, CompensationOutcome};
pub use deployment_service::{
    wait_until_settled, CommandOutput, CommandProvisioner, DeploymentGuard, DeploymentOperation,
    DeploymentService, DeploymentSettings, DeploymentState, DeploymentTicket, ProvisionAction,
    ProvisionError, Provisioner,
};
pub use secret_encryption::{SealedValue, SecretEncryption};
pub use secret_service::{SecretService, SecretServiceOptions};
