//! Access key rotation for identity-provider users
//!
//! A new key is issued in createSecret, proven in testSecret and promoted in
//! finishSecret, after which the superseded key is deactivated and deleted
//! using the new key. Issuing is done with the user's own current key.

use super::strategy::{promote_pending, RotationContext, RotationStrategy};
use crate::domain::{SecretType, VaultCredentials, VersionStage};
use crate::errors::{KeyturnError, Result};
use crate::secrets::{SecretDescription, SecretPayload};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

const USER_NAME_KEY: &str = "user_name";
const ACCESS_KEY_ID_KEY: &str = "access_key_id";
const SECRET_ACCESS_KEY_KEY: &str = "secret_access_key";

/// Access key management on the identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync + fmt::Debug {
    /// Issue a new key for `user_name`, authenticating as `caller`
    async fn create_access_key(
        &self,
        caller: &VaultCredentials,
        user_name: &str,
    ) -> Result<VaultCredentials>;

    /// Authenticate as `key`; returns the identity it resolves to
    async fn verify(&self, key: &VaultCredentials) -> Result<String>;

    async fn deactivate_access_key(
        &self,
        caller: &VaultCredentials,
        user_name: &str,
        access_key_id: &str,
    ) -> Result<()>;

    async fn delete_access_key(
        &self,
        caller: &VaultCredentials,
        user_name: &str,
        access_key_id: &str,
    ) -> Result<()>;
}

/// `user_name` and key pair held in an access key payload
fn access_key_of(payload: &SecretPayload) -> Result<(String, VaultCredentials)> {
    let field = |key: &str| {
        payload
            .get_str(key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                KeyturnError::invalid_configuration(format!("Access key secret is missing '{}'", key))
            })
    };
    let user_name = field(USER_NAME_KEY)?.to_string();
    let key = VaultCredentials::new(field(ACCESS_KEY_ID_KEY)?, field(SECRET_ACCESS_KEY_KEY)?);
    Ok((user_name, key))
}

/// Rotates identity-provider access key pairs
#[derive(Debug)]
pub struct AccessKeyStrategy {
    identity: Arc<dyn IdentityProvider>,
}

impl AccessKeyStrategy {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self { identity }
    }

    /// Deactivate then delete the superseded key. Failures leave a stale
    /// but valid key behind and are only logged.
    async fn retire(&self, ctx: &RotationContext<'_>, caller: &VaultCredentials, user: &str, old_key_id: &str) {
        if let Err(e) = self.identity.deactivate_access_key(caller, user, old_key_id).await {
            warn!(
                secret_id = %ctx.secret_id,
                access_key_id = %old_key_id,
                error = %e,
                "Failed to deactivate superseded access key"
            );
            return;
        }
        match self.identity.delete_access_key(caller, user, old_key_id).await {
            Ok(()) => info!(secret_id = %ctx.secret_id, access_key_id = %old_key_id, "Retired superseded access key"),
            Err(e) => warn!(
                secret_id = %ctx.secret_id,
                access_key_id = %old_key_id,
                error = %e,
                "Superseded access key deactivated but not deleted"
            ),
        }
    }
}

#[async_trait]
impl RotationStrategy for AccessKeyStrategy {
    fn secret_type(&self) -> SecretType {
        SecretType::AwsApiKey
    }

    async fn create_secret(&self, ctx: &RotationContext<'_>, current: &SecretPayload) -> Result<()> {
        let (user, caller) = access_key_of(current)?;
        let issued = self.identity.create_access_key(&caller, &user).await?;

        let mut pending = current.clone();
        pending.insert(ACCESS_KEY_ID_KEY, serde_json::Value::String(issued.access_key_id.clone()));
        let pending = pending.with_secret_field(SECRET_ACCESS_KEY_KEY, &issued.secret_access_key);

        if let Err(e) = ctx.store_pending(pending).await {
            // Keys are capped per user; do not leave an unrecorded one behind
            if let Err(cleanup) =
                self.identity.delete_access_key(&caller, &user, &issued.access_key_id).await
            {
                warn!(
                    secret_id = %ctx.secret_id,
                    access_key_id = %issued.access_key_id,
                    error = %cleanup,
                    "Failed to delete unrecorded access key"
                );
            }
            return Err(e);
        }
        info!(secret_id = %ctx.secret_id, access_key_id = %issued.access_key_id, "Issued pending access key");
        Ok(())
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
        let (_, key) = access_key_of(pending)?;
        let identity = self.identity.verify(&key).await?;
        info!(secret_id = %ctx.secret_id, identity = %identity, "Pending access key verified");
        Ok(())
    }

    async fn finish_secret(
        &self,
        ctx: &RotationContext<'_>,
        description: &SecretDescription,
    ) -> Result<()> {
        if description.stages_of(ctx.token).is_some_and(|s| s.contains(&VersionStage::Current)) {
            return Ok(());
        }

        let old = ctx.current_value().await?;
        let pending = ctx.require_pending_value().await?;
        promote_pending(ctx, description).await?;

        let (user, new_key) = access_key_of(&pending)?;
        match access_key_of(&old) {
            Ok((_, old_key)) if old_key.access_key_id != new_key.access_key_id => {
                self.retire(ctx, &new_key, &user, &old_key.access_key_id).await;
            }
            Ok(_) => {}
            Err(e) => warn!(secret_id = %ctx.secret_id, error = %e, "Superseded value holds no access key"),
        }
        Ok(())
    }
}

/// IAM for key management and STS for verification
#[cfg(feature = "aws")]
#[derive(Debug, Clone)]
pub struct AwsIamIdentityProvider {
    region: String,
    timeout: std::time::Duration,
    /// New keys take a few seconds to become usable
    verify_attempts: u32,
    verify_backoff: std::time::Duration,
}

#[cfg(feature = "aws")]
impl AwsIamIdentityProvider {
    pub fn new(timeout: std::time::Duration) -> Self {
        Self {
            region: "us-east-1".to_string(),
            timeout,
            verify_attempts: 5,
            verify_backoff: std::time::Duration::from_secs(3),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    async fn iam(&self, caller: &VaultCredentials) -> aws_sdk_iam::Client {
        let config = crate::secrets::aws::sdk_config(caller, &self.region, None, self.timeout).await;
        aws_sdk_iam::Client::new(&config)
    }
}

#[cfg(feature = "aws")]
#[async_trait]
impl IdentityProvider for AwsIamIdentityProvider {
    async fn create_access_key(
        &self,
        caller: &VaultCredentials,
        user_name: &str,
    ) -> Result<VaultCredentials> {
        use aws_sdk_iam::error::DisplayErrorContext;

        let output = self
            .iam(caller)
            .await
            .create_access_key()
            .user_name(user_name)
            .send()
            .await
            .map_err(|e| KeyturnError::upstream("create access key", DisplayErrorContext(&e)))?;
        let key = output.access_key().ok_or_else(|| {
            KeyturnError::upstream("create access key", "response carried no access key")
        })?;
        Ok(VaultCredentials::new(key.access_key_id(), key.secret_access_key()))
    }

    async fn verify(&self, key: &VaultCredentials) -> Result<String> {
        use aws_sdk_sts::error::DisplayErrorContext;

        let config = crate::secrets::aws::sdk_config(key, &self.region, None, self.timeout).await;
        let sts = aws_sdk_sts::Client::new(&config);

        let mut attempt = 1;
        loop {
            match sts.get_caller_identity().send().await {
                Ok(output) => return Ok(output.arn().unwrap_or_default().to_string()),
                Err(e) if attempt < self.verify_attempts => {
                    warn!(attempt, error = %DisplayErrorContext(&e), "Access key not usable yet");
                    tokio::time::sleep(self.verify_backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(KeyturnError::upstream("verify access key", DisplayErrorContext(&e)))
                }
            }
        }
    }

    async fn deactivate_access_key(
        &self,
        caller: &VaultCredentials,
        user_name: &str,
        access_key_id: &str,
    ) -> Result<()> {
        use aws_sdk_iam::error::DisplayErrorContext;
        use aws_sdk_iam::types::StatusType;

        self.iam(caller)
            .await
            .update_access_key()
            .user_name(user_name)
            .access_key_id(access_key_id)
            .status(StatusType::Inactive)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| KeyturnError::upstream("deactivate access key", DisplayErrorContext(&e)))
    }

    async fn delete_access_key(
        &self,
        caller: &VaultCredentials,
        user_name: &str,
        access_key_id: &str,
    ) -> Result<()> {
        use aws_sdk_iam::error::DisplayErrorContext;

        self.iam(caller)
            .await
            .delete_access_key()
            .user_name(user_name)
            .access_key_id(access_key_id)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| KeyturnError::upstream("delete access key", DisplayErrorContext(&e)))
    }
}
