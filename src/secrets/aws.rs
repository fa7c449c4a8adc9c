//! AWS Secrets Manager vault client.
//!
//! Every client is built from the credentials of the scope making the call;
//! nothing is read from the ambient AWS credential chain.

use super::client::{
    CreateRemoteSecret, DeletionMode, PutValue, RandomValueSpec, RemoteSecretRef, RotationRule,
    SecretDescription, SecretVaultClient, StageMove, ValueSelector, VaultClientFactory,
    VaultOperation, VersionedValue,
};
use super::error::{VaultError, VaultResult};
use super::types::SecretString;
use crate::domain::{VaultCredentials, VersionStage};
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_secretsmanager::config::Credentials;
use aws_sdk_secretsmanager::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_secretsmanager::types::{RotationRulesType, Tag};
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use std::sync::Arc;
use std::time::Duration;

/// Name reported as the credential provider in SDK diagnostics
const PROVIDER_NAME: &str = "keyturn-scope";

/// Build an SDK config from explicit scope credentials
pub(crate) async fn sdk_config(
    credentials: &VaultCredentials,
    region: &str,
    endpoint_url: Option<&str>,
    timeout: Duration,
) -> SdkConfig {
    let provider = Credentials::new(
        credentials.access_key_id.clone(),
        credentials.secret_access_key.expose_secret().to_string(),
        None,
        None,
        PROVIDER_NAME,
    );

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .credentials_provider(provider)
        .timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build());

    if let Some(endpoint) = endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }

    loader.load().await
}

/// Map an SDK failure onto the vault error taxonomy
pub(crate) fn classify<E, R>(operation: VaultOperation, err: SdkError<E, R>) -> VaultError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    if matches!(err, SdkError::TimeoutError(_)) {
        return VaultError::timeout(operation.as_str());
    }

    let message = err.message().map(str::to_string).unwrap_or_else(|| err.to_string());
    match err.code() {
        Some("ResourceNotFoundException") => VaultError::not_found(message),
        Some("ResourceExistsException") => VaultError::already_exists(message),
        Some("InvalidRequestException")
        | Some("InvalidParameterException")
        | Some("MalformedPolicyDocumentException")
        | Some("LimitExceededException") => VaultError::invalid_request(message),
        Some("UnrecognizedClientException")
        | Some("InvalidSignatureException")
        | Some("AccessDeniedException")
        | Some("ExpiredTokenException") => VaultError::authentication_failed(message),
        _ => VaultError::backend(format!("{} failed: {}", operation, message)),
    }
}

fn stages_from_labels<'a>(labels: impl IntoIterator<Item = &'a String>) -> Vec<VersionStage> {
    labels.into_iter().filter_map(|label| VersionStage::from_label(label)).collect()
}

/// Secrets Manager client bound to one scope's credentials and region
#[derive(Debug, Clone)]
pub struct AwsSecretsManagerVault {
    client: SecretsManagerClient,
}

impl AwsSecretsManagerVault {
    pub fn new(config: &SdkConfig) -> Self {
        Self { client: SecretsManagerClient::new(config) }
    }
}

#[async_trait]
impl SecretVaultClient for AwsSecretsManagerVault {
    #[tracing::instrument(skip(self, request), fields(vault = "aws", name = %request.name))]
    async fn create_secret(&self, request: CreateRemoteSecret) -> VaultResult<RemoteSecretRef> {
        let tags: Vec<Tag> = request
            .tags
            .iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect();

        let output = self
            .client
            .create_secret()
            .name(&request.name)
            .secret_string(request.value.to_secret_string().expose_secret())
            .set_description(request.description.clone())
            .set_tags(if tags.is_empty() { None } else { Some(tags) })
            .send()
            .await
            .map_err(|e| classify(VaultOperation::Create, e))?;

        let arn = output
            .arn()
            .map(str::to_string)
            .ok_or_else(|| VaultError::backend("create_secret returned no ARN"))?;

        Ok(RemoteSecretRef {
            arn,
            name: output.name().unwrap_or(&request.name).to_string(),
            version_id: output.version_id().map(str::to_string),
        })
    }

    #[tracing::instrument(skip(self), fields(vault = "aws"))]
    async fn describe_secret(&self, secret_id: &str) -> VaultResult<SecretDescription> {
        let output = self
            .client
            .describe_secret()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| classify(VaultOperation::Describe, e))?;

        Ok(SecretDescription {
            arn: output.arn().unwrap_or(secret_id).to_string(),
            name: output.name().unwrap_or_default().to_string(),
            rotation_enabled: output.rotation_enabled().unwrap_or(false),
            rotation_function_ref: output.rotation_lambda_arn().map(str::to_string),
            tags: output
                .tags()
                .iter()
                .filter_map(|t| Some((t.key()?.to_string(), t.value()?.to_string())))
                .collect(),
            versions: output
                .version_ids_to_stages()
                .map(|map| {
                    map.iter()
                        .map(|(version, labels)| (version.clone(), stages_from_labels(labels)))
                        .collect()
                })
                .unwrap_or_default(),
            deleted: output.deleted_date().is_some(),
        })
    }

    #[tracing::instrument(skip(self), fields(vault = "aws"))]
    async fn get_value(
        &self,
        secret_id: &str,
        selector: ValueSelector,
    ) -> VaultResult<VersionedValue> {
        let (version_id, stage) = match selector {
            ValueSelector::Stage(stage) => (None, Some(stage)),
            ValueSelector::Version { version_id, stage } => (Some(version_id), stage),
        };

        let output = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .set_version_id(version_id)
            .set_version_stage(stage.map(|s| s.as_label().to_string()))
            .send()
            .await
            .map_err(|e| classify(VaultOperation::GetValue, e))?;

        Ok(VersionedValue {
            version_id: output.version_id().unwrap_or_default().to_string(),
            stages: stages_from_labels(output.version_stages()),
            text: output.secret_string().map(SecretString::from),
            binary: output.secret_binary().map(|blob| blob.as_ref().to_vec()),
        })
    }

    #[tracing::instrument(skip(self, value), fields(vault = "aws"))]
    async fn put_value(&self, secret_id: &str, value: PutValue) -> VaultResult<String> {
        let stages: Vec<String> = value.stages.iter().map(|s| s.as_label().to_string()).collect();

        let output = self
            .client
            .put_secret_value()
            .secret_id(secret_id)
            .secret_string(value.value.to_secret_string().expose_secret())
            .set_client_request_token(value.request_token)
            .set_version_stages(if stages.is_empty() { None } else { Some(stages) })
            .send()
            .await
            .map_err(|e| classify(VaultOperation::PutValue, e))?;

        Ok(output.version_id().unwrap_or_default().to_string())
    }

    #[tracing::instrument(skip(self), fields(vault = "aws"))]
    async fn delete_secret(&self, secret_id: &str, mode: DeletionMode) -> VaultResult<()> {
        let request = self.client.delete_secret().secret_id(secret_id);
        let request = match mode {
            DeletionMode::RecoveryWindow { days } => request.recovery_window_in_days(days.into()),
            DeletionMode::Force => request.force_delete_without_recovery(true),
        };
        request.send().await.map_err(|e| classify(VaultOperation::Delete, e))?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(vault = "aws"))]
    async fn rotate_secret(&self, secret_id: &str) -> VaultResult<String> {
        let output = self
            .client
            .rotate_secret()
            .secret_id(secret_id)
            .rotate_immediately(true)
            .send()
            .await
            .map_err(|e| classify(VaultOperation::Rotate, e))?;

        output
            .version_id()
            .map(str::to_string)
            .ok_or_else(|| VaultError::backend("rotate_secret returned no version id"))
    }

    #[tracing::instrument(skip(self, rule), fields(vault = "aws"))]
    async fn enable_rotation(
        &self,
        secret_id: &str,
        rotation_function_ref: &str,
        rule: &RotationRule,
    ) -> VaultResult<()> {
        let rules = RotationRulesType::builder()
            .set_automatically_after_days(rule.automatically_after_days.map(i64::from))
            .set_schedule_expression(rule.schedule_expression.clone())
            .build();

        self.client
            .rotate_secret()
            .secret_id(secret_id)
            .rotation_lambda_arn(rotation_function_ref)
            .rotation_rules(rules)
            .rotate_immediately(false)
            .send()
            .await
            .map_err(|e| classify(VaultOperation::EnableRotation, e))?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(vault = "aws"))]
    async fn random_value(&self, spec: &RandomValueSpec) -> VaultResult<SecretString> {
        let output = self
            .client
            .get_random_password()
            .password_length(spec.length.into())
            .exclude_characters(&spec.exclude_characters)
            .exclude_punctuation(spec.exclude_punctuation)
            .send()
            .await
            .map_err(|e| classify(VaultOperation::RandomValue, e))?;

        output
            .random_password()
            .map(SecretString::from)
            .ok_or_else(|| VaultError::backend("get_random_password returned no value"))
    }

    #[tracing::instrument(skip(self), fields(vault = "aws"))]
    async fn move_version_stage(&self, secret_id: &str, stage_move: StageMove) -> VaultResult<()> {
        self.client
            .update_secret_version_stage()
            .secret_id(secret_id)
            .version_stage(stage_move.stage.as_label())
            .set_move_to_version_id(stage_move.move_to)
            .set_remove_from_version_id(stage_move.remove_from)
            .send()
            .await
            .map_err(|e| classify(VaultOperation::MoveStage, e))?;
        Ok(())
    }
}

/// Builds a fresh Secrets Manager client for every call
#[derive(Debug, Clone)]
pub struct AwsVaultClientFactory {
    endpoint_url: Option<String>,
    timeout: Duration,
}

impl AwsVaultClientFactory {
    pub fn new(endpoint_url: Option<String>, timeout: Duration) -> Self {
        Self { endpoint_url, timeout }
    }
}

#[async_trait]
impl VaultClientFactory for AwsVaultClientFactory {
    async fn client(
        &self,
        credentials: &VaultCredentials,
        region: &str,
    ) -> VaultResult<Arc<dyn SecretVaultClient>> {
        if !credentials.is_complete() {
            return Err(VaultError::authentication_failed("incomplete vault credentials"));
        }
        let config =
            sdk_config(credentials, region, self.endpoint_url.as_deref(), self.timeout).await;
        let client: Arc<dyn SecretVaultClient> = Arc::new(AwsSecretsManagerVault::new(&config));
        Ok(client)
    }
}
