//! Rotation for opaque secrets with no external target system

use super::strategy::{RotationContext, RotationStrategy};
use crate::domain::SecretType;
use crate::errors::{KeyturnError, Result};
use crate::secrets::{RandomValueSpec, SecretPayload, PLAIN_VALUE_KEY};
use async_trait::async_trait;
use tracing::debug;

/// Field names checked, in order, for the value to regenerate
const VALUE_KEYS: [&str; 4] = [PLAIN_VALUE_KEY, "password", "secret", "token"];

/// Replaces the secret's value with a fresh random one. Other fields in the
/// payload are carried over untouched.
#[derive(Debug, Clone)]
pub struct GenericSecretStrategy {
    default_key: String,
    spec: RandomValueSpec,
}

impl Default for GenericSecretStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl GenericSecretStrategy {
    pub fn new() -> Self {
        Self::with_value_key(PLAIN_VALUE_KEY)
    }

    /// Field written when the current payload has none of the usual value keys
    pub fn with_value_key(key: impl Into<String>) -> Self {
        Self { default_key: key.into(), spec: RandomValueSpec::generic() }
    }

    fn value_key<'a>(&'a self, current: &SecretPayload) -> &'a str {
        match VALUE_KEYS.iter().find(|k| current.get_str(k).is_some()) {
            Some(key) => key,
            None => &self.default_key,
        }
    }
}

#[async_trait]
impl RotationStrategy for GenericSecretStrategy {
    fn secret_type(&self) -> SecretType {
        SecretType::GenericSecret
    }

    async fn create_secret(&self, ctx: &RotationContext<'_>, current: &SecretPayload) -> Result<()> {
        let key = self.value_key(current);
        let fresh = ctx.random_value(&self.spec).await?;
        debug!(secret_id = %ctx.secret_id, field = key, "Generated replacement value");
        ctx.store_pending(current.with_secret_field(key, &fresh)).await
    }

    async fn set_secret(
        &self,
        _ctx: &RotationContext<'_>,
        _pending: &SecretPayload,
        _current: &SecretPayload,
    ) -> Result<()> {
        Ok(())
    }

    async fn test_secret(&self, ctx: &RotationContext<'_>, pending: &SecretPayload) -> Result<()> {
        match pending.get_str_any(&VALUE_KEYS).or_else(|| pending.get_str(&self.default_key)) {
            Some(value) if !value.is_empty() => Ok(()),
            _ => Err(KeyturnError::upstream(
                "test pending secret",
                format!("pending value of {} is empty", ctx.secret_id),
            )),
        }
    }
}
