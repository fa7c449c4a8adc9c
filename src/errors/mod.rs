//! # Error Handling
//!
//! Crate-wide error type. Vault calls have their own [`crate::secrets::VaultError`]
//! which callers wrap into [`KeyturnError::Upstream`] with operation context.

pub mod types;

pub use types::{KeyturnError, Result};
