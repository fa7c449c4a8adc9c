//! Remote secret vault access.
//!
//! The vault holds the authoritative value and version history of every
//! REMOTE secret. This module defines:
//!
//! - [`SecretVaultClient`]: the vault capability interface (create, describe,
//!   read by version or stage, write, delete, trigger and configure rotation,
//!   random values, stage moves)
//! - [`VaultClientFactory`]: builds a client per call from explicit scope
//!   credentials, so there is no process-wide client
//! - [`InMemoryVault`]: an in-process vault for development and tests
//! - `AwsSecretsManagerVault` (feature `aws`): the AWS Secrets Manager client
//!
//! # Security Considerations
//!
//! - [`SecretString`] and [`SecretPayload`] never print values through `Debug`
//! - Vault clients never log secret values
//! - Credentials are passed explicitly and never cached between calls

#[cfg(feature = "aws")]
pub mod aws;
pub mod client;
pub mod error;
pub mod memory;
pub mod types;

pub use client::{
    CreateRemoteSecret, DeletionMode, PutValue, RandomValueSpec, RemoteSecretRef, RotationRule,
    SecretDescription, SecretVaultClient, StageMove, ValueSelector, VaultClientFactory,
    VaultOperation, VersionedValue, SCOPE_TAG, SECRET_TYPE_TAG,
};
pub use error::{VaultError, VaultResult};
pub use memory::{InMemoryVault, InMemoryVaultFactory};
pub use types::{SecretPayload, SecretString, PLAIN_VALUE_KEY};

#[cfg(feature = "aws")]
pub use aws::{AwsSecretsManagerVault, AwsVaultClientFactory};
