//! The four-step rotation protocol
//!
//! Every credential type implements the same four steps. They differ only in
//! what happens outside the vault: a password change, a key reissue, or
//! nothing at all. Promotion of PENDING to CURRENT is shared.

use crate::domain::{SecretType, VersionStage};
use crate::errors::{KeyturnError, Result};
use crate::observability::MetricsRecorder;
use crate::secrets::{
    PutValue, RandomValueSpec, SecretDescription, SecretPayload, SecretString, SecretVaultClient,
    StageMove, ValueSelector, VaultOperation,
};
use async_trait::async_trait;
use tracing::info;

/// Everything a step needs to talk to the vault for one rotation cycle
pub struct RotationContext<'a> {
    pub vault: &'a dyn SecretVaultClient,
    /// Vault identifier of the secret being rotated
    pub secret_id: &'a str,
    /// Version id of the candidate, shared by all four steps
    pub token: &'a str,
    pub metrics: &'a MetricsRecorder,
}

impl<'a> RotationContext<'a> {
    pub fn new(
        vault: &'a dyn SecretVaultClient,
        secret_id: &'a str,
        token: &'a str,
        metrics: &'a MetricsRecorder,
    ) -> Self {
        Self { vault, secret_id, token, metrics }
    }

    pub async fn current_value(&self) -> Result<SecretPayload> {
        self.metrics
            .time_vault_call(
                VaultOperation::GetValue.as_str(),
                self.vault.get_value(self.secret_id, ValueSelector::current()),
            )
            .await
            .and_then(|v| v.decode())
            .map_err(|e| KeyturnError::upstream("read current secret value", e))
    }

    /// Value holding PREVIOUS, if the secret has been rotated before
    pub async fn previous_value(&self) -> Result<Option<SecretPayload>> {
        let read = self
            .metrics
            .time_vault_call(
                VaultOperation::GetValue.as_str(),
                self.vault.get_value(self.secret_id, ValueSelector::Stage(VersionStage::Previous)),
            )
            .await;
        match read {
            Ok(version) => version
                .decode()
                .map(Some)
                .map_err(|e| KeyturnError::upstream("decode previous secret value", e)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(KeyturnError::upstream("read previous secret value", e)),
        }
    }

    /// The candidate stored under this cycle's token; `None` if nothing has
    /// been written yet
    pub async fn pending_value(&self) -> Result<Option<SecretPayload>> {
        let read = self
            .metrics
            .time_vault_call(
                VaultOperation::GetValue.as_str(),
                self.vault.get_value(self.secret_id, ValueSelector::pending(self.token)),
            )
            .await;
        match read {
            Ok(version) => version
                .decode()
                .map(Some)
                .map_err(|e| KeyturnError::upstream("decode pending secret value", e)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(KeyturnError::upstream("read pending secret value", e)),
        }
    }

    /// Pending value that must exist for steps after createSecret
    pub async fn require_pending_value(&self) -> Result<SecretPayload> {
        self.pending_value().await?.ok_or_else(|| {
            KeyturnError::not_found("Pending secret version", format!("{}@{}", self.secret_id, self.token))
        })
    }

    /// Store the candidate tagged PENDING under the token
    pub async fn store_pending(&self, value: SecretPayload) -> Result<()> {
        self.metrics
            .time_vault_call(
                VaultOperation::PutValue.as_str(),
                self.vault.put_value(self.secret_id, PutValue::pending(value, self.token)),
            )
            .await
            .map_err(|e| KeyturnError::upstream("store pending secret value", e))?;
        info!(secret_id = %self.secret_id, "Stored pending secret value");
        Ok(())
    }

    pub async fn random_value(&self, spec: &RandomValueSpec) -> Result<SecretString> {
        self.metrics
            .time_vault_call(VaultOperation::RandomValue.as_str(), self.vault.random_value(spec))
            .await
            .map_err(|e| KeyturnError::upstream("generate random value", e))
    }
}

/// Per-type implementation of the rotation protocol
#[async_trait]
pub trait RotationStrategy: Send + Sync {
    /// Credential type this strategy rotates
    fn secret_type(&self) -> SecretType;

    /// Produce a candidate value and store it PENDING under the token
    async fn create_secret(&self, ctx: &RotationContext<'_>, current: &SecretPayload)
        -> Result<()>;

    /// Apply the candidate to the target system using the CURRENT credential
    async fn set_secret(
        &self,
        ctx: &RotationContext<'_>,
        pending: &SecretPayload,
        current: &SecretPayload,
    ) -> Result<()>;

    /// Prove the candidate works against the target system
    async fn test_secret(&self, ctx: &RotationContext<'_>, pending: &SecretPayload) -> Result<()>;

    /// Promote the candidate to CURRENT
    async fn finish_secret(
        &self,
        ctx: &RotationContext<'_>,
        description: &SecretDescription,
    ) -> Result<()> {
        promote_pending(ctx, description).await
    }
}

/// Move CURRENT onto the token's version in one stage-move request. The old
/// CURRENT becomes PREVIOUS in the same call.
///
/// Fails when the token holds no PENDING value, so a finish that was never
/// preceded by createSecret cannot promote anything.
pub async fn promote_pending(ctx: &RotationContext<'_>, description: &SecretDescription) -> Result<()> {
    let stages = description.stages_of(ctx.token).unwrap_or_default();
    if stages.contains(&VersionStage::Current) {
        info!(secret_id = %ctx.secret_id, "Token already holds CURRENT");
        return Ok(());
    }
    if description.version_with_stage(VersionStage::Pending) != Some(ctx.token) {
        return Err(KeyturnError::not_found(
            "Pending secret version",
            format!("{}@{}", ctx.secret_id, ctx.token),
        ));
    }
    ctx.require_pending_value().await?;

    let previous = description.version_with_stage(VersionStage::Current).map(str::to_string);
    ctx.metrics
        .time_vault_call(
            VaultOperation::MoveStage.as_str(),
            ctx.vault.move_version_stage(
                ctx.secret_id,
                StageMove {
                    stage: VersionStage::Current,
                    move_to: Some(ctx.token.to_string()),
                    remove_from: previous.clone(),
                },
            ),
        )
        .await
        .map_err(|e| KeyturnError::upstream("promote pending version", e))?;

    info!(
        secret_id = %ctx.secret_id,
        previous_version = ?previous,
        "Promoted pending version to CURRENT"
    );
    Ok(())
}
