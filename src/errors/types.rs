//! # Error Types
//!
//! Error taxonomy for the secret lifecycle engine using `thiserror`.

/// Custom result type for keyturn operations
pub type Result<T> = std::result::Result<T, KeyturnError>;

/// Main error type for keyturn
#[derive(thiserror::Error, Debug)]
pub enum KeyturnError {
    /// Secret or scope absent
    #[error("Resource not found: {resource_type} with ID '{id}'")]
    NotFound { resource_type: String, id: String },

    /// Duplicate name, secret already present upstream, or a concurrent deployment
    #[error("Resource conflict: {message}")]
    Conflict { message: String, resource_type: String },

    /// Rotation requested for an unsupported type, or the scope lacks a
    /// rotation function or vault credentials
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Any vault or target-system call failure
    #[error("Upstream failure during {operation}: {message}")]
    Upstream { operation: String, message: String },

    /// Provisioning tool failed, its output could not be parsed, or a state
    /// lock could not be recovered
    #[error("Provisioning failure: {message}")]
    Provisioning { message: String },

    /// Database and storage errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Input validation errors
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Application configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl KeyturnError {
    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create a conflict error
    pub fn conflict<M: Into<String>, R: Into<String>>(message: M, resource_type: R) -> Self {
        Self::Conflict { message: message.into(), resource_type: resource_type.into() }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfiguration { message: message.into() }
    }

    /// Wrap an upstream (vault or target system) failure with operation context
    pub fn upstream<O: Into<String>, E: std::fmt::Display>(operation: O, error: E) -> Self {
        Self::Upstream { operation: operation.into(), message: error.to_string() }
    }

    /// Create a provisioning failure
    pub fn provisioning<S: Into<String>>(message: S) -> Self {
        Self::Provisioning { message: message.into() }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Create a database error with context
    pub fn database<S: Into<String>>(source: sqlx::Error, context: S) -> Self {
        Self::Database { source, context: context.into() }
    }

    /// Whether this error is a NotFound
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error is a Conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// HTTP status code a transport layer should use for this error
    pub fn status_code(&self) -> u16 {
        match self {
            KeyturnError::NotFound { .. } => 404,
            KeyturnError::Conflict { .. } => 409,
            KeyturnError::InvalidConfiguration { .. } => 422,
            KeyturnError::Validation { .. } => 400,
            KeyturnError::Serialization { .. } => 400,
            KeyturnError::Upstream { .. } => 502,
            KeyturnError::Provisioning { .. } => 502,
            KeyturnError::Database { .. } => 500,
            KeyturnError::Config { .. } => 500,
            KeyturnError::Internal { .. } => 500,
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, KeyturnError::Database { .. } | KeyturnError::Upstream { .. })
    }
}

impl From<sqlx::Error> for KeyturnError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<serde_json::Error> for KeyturnError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<config::ConfigError> for KeyturnError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for KeyturnError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = KeyturnError::not_found("Secret", "abc");
        assert_eq!(error.to_string(), "Resource not found: Secret with ID 'abc'");

        let error = KeyturnError::upstream("create remote secret", "throttled");
        assert_eq!(error.to_string(), "Upstream failure during create remote secret: throttled");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(KeyturnError::not_found("Secret", "x").status_code(), 404);
        assert_eq!(KeyturnError::conflict("dup", "Secret").status_code(), 409);
        assert_eq!(KeyturnError::invalid_configuration("x").status_code(), 422);
        assert_eq!(KeyturnError::validation("x").status_code(), 400);
        assert_eq!(KeyturnError::upstream("op", "x").status_code(), 502);
        assert_eq!(KeyturnError::provisioning("x").status_code(), 502);
        assert_eq!(KeyturnError::internal("x").status_code(), 500);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(KeyturnError::upstream("op", "timeout").is_retryable());
        assert!(!KeyturnError::conflict("dup", "Secret").is_retryable());
        assert!(!KeyturnError::invalid_configuration("x").is_retryable());
    }

    #[test]
    fn test_validation_field() {
        let error = KeyturnError::validation_field("name cannot be empty", "name");
        if let KeyturnError::Validation { field, .. } = error {
            assert_eq!(field, Some("name".to_string()));
        } else {
            panic!("expected validation error");
        }
    }

    #[test]
    fn test_error_conversions() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error: KeyturnError = json_error.into();
        assert!(matches!(error, KeyturnError::Serialization { .. }));
    }
}
