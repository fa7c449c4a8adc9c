//! Error types for vault operations.

use thiserror::Error;

/// Result type for vault operations.
pub type VaultResult<T> = std::result::Result<T, VaultError>;

/// Errors returned by a [`super::SecretVaultClient`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// Secret (or the requested version/stage) not found in the vault.
    #[error("Secret not found in vault: {key}")]
    NotFound { key: String },

    /// A secret with this name, or a different value for this request token,
    /// already exists.
    #[error("Secret already exists in vault: {key}")]
    AlreadyExists { key: String },

    /// The vault rejected the request as malformed or not allowed in the
    /// secret's current state.
    #[error("Invalid vault request: {message}")]
    InvalidRequest { message: String },

    /// Authentication with the vault failed.
    #[error("Vault authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// The request did not complete in time.
    #[error("Vault request timed out: {operation}")]
    Timeout { operation: String },

    /// Any other backend failure.
    #[error("Vault backend error: {message}")]
    Backend { message: String },
}

impl VaultError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists { key: key.into() }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest { message: message.into() }
    }

    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed { message: message.into() }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout { operation: operation.into() }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
