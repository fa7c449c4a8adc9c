//! Repository modules for data access
//!
//! Each repository is a trait plus a PostgreSQL implementation; services depend
//! on the trait so tests can substitute in-memory stores.

pub mod scope;
pub mod secret;

pub use scope::{
    DeploymentClaim, DeploymentUpdate, FunctionRefChange, ScopeConfigStore, SqlxScopeRepository,
};
pub use secret::{SecretRecordStore, SqlxSecretRepository};

/// PostgreSQL `unique_violation`
const UNIQUE_VIOLATION: &str = "23505";

/// Whether a database error is a unique-key violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}
