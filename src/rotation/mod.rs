//! # Credential rotation
//!
//! The vault rotates a secret by invoking a rotation function four times with
//! the same request token: `createSecret`, `setSecret`, `testSecret` and
//! `finishSecret`. [`RotationHandler`] receives those invocations and hands
//! each to the [`RotationStrategy`] registered for the secret's credential
//! type.
//!
//! | Credential type          | Strategy                     | Target                       |
//! |--------------------------|------------------------------|------------------------------|
//! | `RDS_CREDENTIALS`        | [`DatabasePasswordStrategy`] | [`PostgresTarget`]           |
//! | `DOCUMENTDB_CREDENTIALS` | [`DatabasePasswordStrategy`] | `DocumentDbTarget` (feature `documentdb`) |
//! | `AWS_API_KEY`            | [`AccessKeyStrategy`]        | `AwsIamIdentityProvider` (feature `aws`) |
//! | `GENERIC_SECRET`         | [`GenericSecretStrategy`]    | none                         |
//!
//! Every step is safe to repeat: createSecret skips when a value already
//! exists for the token, setSecret skips when the target already accepts the
//! pending credential, and finishSecret is a no-op once the token holds
//! CURRENT.

pub mod database;
pub mod generic;
pub mod handler;
pub mod identity;
pub mod registry;
pub mod strategy;

pub use database::{CredentialTarget, DatabaseLogin, DatabasePasswordStrategy, PostgresTarget};
pub use generic::GenericSecretStrategy;
pub use handler::RotationHandler;
pub use identity::{AccessKeyStrategy, IdentityProvider};
pub use registry::RotationStrategyRegistry;
pub use strategy::{promote_pending, RotationContext, RotationStrategy};

#[cfg(feature = "documentdb")]
pub use database::DocumentDbTarget;
#[cfg(feature = "aws")]
pub use identity::AwsIamIdentityProvider;
