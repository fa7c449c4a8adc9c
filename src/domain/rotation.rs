//! Rotation protocol types shared by the vault client and the rotation handler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version-stage labels the vault attaches to secret versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VersionStage {
    #[serde(rename = "AWSPENDING")]
    Pending,
    #[serde(rename = "AWSCURRENT")]
    Current,
    #[serde(rename = "AWSPREVIOUS")]
    Previous,
}

impl VersionStage {
    /// Label used on the wire
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Pending => "AWSPENDING",
            Self::Current => "AWSCURRENT",
            Self::Previous => "AWSPREVIOUS",
        }
    }

    /// Parse a wire label; custom labels yield `None`
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "AWSPENDING" => Some(Self::Pending),
            "AWSCURRENT" => Some(Self::Current),
            "AWSPREVIOUS" => Some(Self::Previous),
            _ => None,
        }
    }
}

impl fmt::Display for VersionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_label())
    }
}

/// The four steps of a rotation cycle, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RotationStep {
    CreateSecret,
    SetSecret,
    TestSecret,
    FinishSecret,
}

impl RotationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateSecret => "createSecret",
            Self::SetSecret => "setSecret",
            Self::TestSecret => "testSecret",
            Self::FinishSecret => "finishSecret",
        }
    }
}

impl FromStr for RotationStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createSecret" => Ok(Self::CreateSecret),
            "setSecret" => Ok(Self::SetSecret),
            "testSecret" => Ok(Self::TestSecret),
            "finishSecret" => Ok(Self::FinishSecret),
            _ => Err(format!("Unknown rotation step: {}", s)),
        }
    }
}

impl fmt::Display for RotationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single rotation-function invocation. Field names follow the vault's
/// invocation payload (`Step`, `SecretId`, `ClientRequestToken`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationEvent {
    #[serde(rename = "Step")]
    pub step: RotationStep,
    /// Vault identifier of the secret being rotated
    #[serde(rename = "SecretId")]
    pub secret_id: String,
    /// Idempotency key shared by all four steps of one rotation cycle
    #[serde(rename = "ClientRequestToken")]
    pub request_token: String,
}

impl RotationEvent {
    pub fn new(step: RotationStep, secret_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self { step, secret_id: secret_id.into(), request_token: token.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parses_vault_payload() {
        let json = r#"{
            "Step": "finishSecret",
            "SecretId": "arn:aws:secretsmanager:us-east-1:123456789012:secret:db-1-AbCdEf",
            "ClientRequestToken": "3f1c2b8e-0000-4000-8000-000000000001"
        }"#;
        let event: RotationEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.step, RotationStep::FinishSecret);
        assert!(event.secret_id.ends_with("db-1-AbCdEf"));
    }

    #[test]
    fn test_unknown_step_rejected() {
        let json = r#"{"Step":"rollback","SecretId":"x","ClientRequestToken":"t"}"#;
        assert!(serde_json::from_str::<RotationEvent>(json).is_err());
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(VersionStage::from_label("AWSCURRENT"), Some(VersionStage::Current));
        assert_eq!(VersionStage::from_label("custom"), None);
        assert_eq!(VersionStage::Pending.to_string(), "AWSPENDING");
    }
}
