//! Secret domain types
//!
//! A secret record is owned by the local store; when its storage mode is
//! [`StorageMode::Remote`] the authoritative value and version history live in
//! the vault and the record only carries `remote_ref`.

use crate::domain::{ScopeId, SecretId};
use crate::secrets::SecretPayload;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Credential type, which selects the rotation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecretType {
    /// Relational database user credentials
    RdsCredentials,
    /// Document store user credentials
    DocumentdbCredentials,
    /// Identity-provider access key pair
    AwsApiKey,
    /// Opaque value with no external target system
    GenericSecret,
}

impl SecretType {
    pub const ALL: [SecretType; 4] = [
        SecretType::RdsCredentials,
        SecretType::DocumentdbCredentials,
        SecretType::AwsApiKey,
        SecretType::GenericSecret,
    ];

    /// Get the database representation of this type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RdsCredentials => "RDS_CREDENTIALS",
            Self::DocumentdbCredentials => "DOCUMENTDB_CREDENTIALS",
            Self::AwsApiKey => "AWS_API_KEY",
            Self::GenericSecret => "GENERIC_SECRET",
        }
    }

    /// Whether this build carries a rotation strategy for the type.
    ///
    /// Document-store credentials need the `documentdb` feature and access
    /// keys need the `aws` feature, matching
    /// `RotationStrategyRegistry::with_builtin_strategies`.
    pub fn supports_rotation(&self) -> bool {
        match self {
            Self::RdsCredentials | Self::GenericSecret => true,
            Self::DocumentdbCredentials => cfg!(feature = "documentdb"),
            Self::AwsApiKey => cfg!(feature = "aws"),
        }
    }
}

impl FromStr for SecretType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RDS_CREDENTIALS" => Ok(Self::RdsCredentials),
            "DOCUMENTDB_CREDENTIALS" => Ok(Self::DocumentdbCredentials),
            "AWS_API_KEY" => Ok(Self::AwsApiKey),
            "GENERIC_SECRET" => Ok(Self::GenericSecret),
            _ => Err(format!("Unknown secret type: {}", s)),
        }
    }
}

impl fmt::Display for SecretType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the secret value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageMode {
    /// Value encrypted in the local store
    Local,
    /// Value held by the remote vault
    #[default]
    Remote,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::Remote => "REMOTE",
        }
    }
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOCAL" => Ok(Self::Local),
            "REMOTE" => Ok(Self::Remote),
            _ => Err(format!("Unknown storage mode: {}", s)),
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static EVERY_DAYS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:every\s+(\d+)\s+days?|rate\(\s*(\d+)\s+days?\s*\)|(\d+)d)$")
        .expect("rotation schedule regex is valid")
});

/// Upper bound the vault accepts for day-based rotation intervals
pub const MAX_ROTATION_DAYS: u32 = 1000;

/// How often the vault should trigger rotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationSchedule {
    /// Rotate every N days
    EveryDays(u32),
    /// Raw `cron(...)` expression passed through to the vault
    Expression(String),
}

impl FromStr for RotationSchedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lowered = trimmed.to_lowercase();

        if lowered.starts_with("cron(") && lowered.ends_with(')') {
            return Ok(Self::Expression(trimmed.to_string()));
        }

        let captures = EVERY_DAYS
            .captures(&lowered)
            .ok_or_else(|| format!("Unrecognized rotation schedule: '{}'", trimmed))?;
        let days: u32 = captures
            .iter()
            .skip(1)
            .flatten()
            .next()
            .and_then(|m| m.as_str().parse().ok())
            .ok_or_else(|| format!("Invalid day count in rotation schedule: '{}'", trimmed))?;

        if days == 0 || days > MAX_ROTATION_DAYS {
            return Err(format!(
                "Rotation interval must be between 1 and {} days, got {}",
                MAX_ROTATION_DAYS, days
            ));
        }
        Ok(Self::EveryDays(days))
    }
}

impl fmt::Display for RotationSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EveryDays(1) => write!(f, "every 1 day"),
            Self::EveryDays(days) => write!(f, "every {} days", days),
            Self::Expression(expr) => write!(f, "{}", expr),
        }
    }
}

impl Serialize for RotationSchedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RotationSchedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Locally persisted secret metadata. Never carries the secret value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretRecord {
    pub id: SecretId,
    pub scope_id: ScopeId,
    pub name: String,
    pub secret_type: SecretType,
    pub storage_mode: StorageMode,
    /// Vault identifier, present iff `storage_mode` is Remote
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ref: Option<String>,
    pub region: String,
    pub rotation_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_schedule: Option<RotationSchedule>,
    pub last_rotated_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata merged with the decoded current value
#[derive(Debug, Clone, Serialize)]
pub struct SecretWithValue {
    #[serde(flatten)]
    pub metadata: SecretRecord,
    pub value: SecretPayload,
}

/// Caller input for creating a secret
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSecretRequest {
    pub scope_id: ScopeId,
    pub name: String,
    pub secret_type: SecretType,
    pub value: SecretPayload,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub storage_mode: StorageMode,
    #[serde(default)]
    pub rotation_enabled: bool,
    #[serde(default)]
    pub rotation_schedule: Option<RotationSchedule>,
    /// Falls back to the scope's default region
    #[serde(default)]
    pub region: Option<String>,
}

impl CreateSecretRequest {
    /// Checks that need nothing but the request itself
    pub fn validate_shape(&self) -> Result<(), String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("secret name cannot be empty".to_string());
        }
        if name.len() > 512 {
            return Err(format!("secret name exceeds 512 characters ({})", name.len()));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || "/_+=.@-".contains(c)) {
            return Err(format!("secret name '{}' contains invalid characters", name));
        }
        if self.value.is_empty() {
            return Err("secret value cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Caller input for updating a secret. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSecretRequest {
    #[serde(default)]
    pub value: Option<SecretPayload>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Fields the store needs to insert a record
#[derive(Debug, Clone)]
pub struct NewSecretRecord {
    pub scope_id: ScopeId,
    pub name: String,
    pub secret_type: SecretType,
    pub storage_mode: StorageMode,
    pub remote_ref: Option<String>,
    pub region: String,
    pub rotation_enabled: bool,
    pub rotation_schedule: Option<RotationSchedule>,
    pub description: Option<String>,
    /// Value to encrypt locally, only for Local storage mode
    pub local_value: Option<SecretPayload>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_type_parse() {
        for st in SecretType::ALL {
            let parsed: SecretType = st.as_str().parse().unwrap();
            assert_eq!(st, parsed);
        }
        assert!("TLS_CERTIFICATE".parse::<SecretType>().is_err());
    }

    #[test]
    fn test_supports_rotation_follows_enabled_features() {
        assert!(SecretType::RdsCredentials.supports_rotation());
        assert!(SecretType::GenericSecret.supports_rotation());
        assert_eq!(SecretType::DocumentdbCredentials.supports_rotation(), cfg!(feature = "documentdb"));
        assert_eq!(SecretType::AwsApiKey.supports_rotation(), cfg!(feature = "aws"));
    }

    #[test]
    fn test_secret_type_serde_uses_wire_names() {
        let json = serde_json::to_string(&SecretType::DocumentdbCredentials).unwrap();
        assert_eq!(json, "\"DOCUMENTDB_CREDENTIALS\"");
    }

    #[test]
    fn test_rotation_schedule_forms() {
        assert_eq!("every 30 days".parse::<RotationSchedule>(), Ok(RotationSchedule::EveryDays(30)));
        assert_eq!("Every 1 day".parse::<RotationSchedule>(), Ok(RotationSchedule::EveryDays(1)));
        assert_eq!("rate(7 days)".parse::<RotationSchedule>(), Ok(RotationSchedule::EveryDays(7)));
        assert_eq!("14d".parse::<RotationSchedule>(), Ok(RotationSchedule::EveryDays(14)));
        assert_eq!(
            "cron(0 4 ? * SUN *)".parse::<RotationSchedule>(),
            Ok(RotationSchedule::Expression("cron(0 4 ? * SUN *)".to_string()))
        );
    }

    #[test]
    fn test_rotation_schedule_rejects_out_of_range() {
        assert!("every 0 days".parse::<RotationSchedule>().is_err());
        assert!("every 1001 days".parse::<RotationSchedule>().is_err());
        assert!("weekly".parse::<RotationSchedule>().is_err());
    }

    #[test]
    fn test_rotation_schedule_display_parses_back() {
        let schedule = RotationSchedule::EveryDays(30);
        assert_eq!(schedule.to_string().parse::<RotationSchedule>().unwrap(), schedule);
    }

    #[test]
    fn test_create_request_shape_validation() {
        let mut request = CreateSecretRequest {
            scope_id: ScopeId::from_str_unchecked("tenant"),
            name: "db-1".to_string(),
            secret_type: SecretType::GenericSecret,
            value: SecretPayload::single("value", "s3cret"),
            description: None,
            storage_mode: StorageMode::Remote,
            rotation_enabled: false,
            rotation_schedule: None,
            region: None,
        };
        assert!(request.validate_shape().is_ok());

        request.name = "bad name!".to_string();
        assert!(request.validate_shape().is_err());

        request.name = "ok".to_string();
        request.value = SecretPayload::default();
        assert!(request.validate_shape().is_err());
    }
}
