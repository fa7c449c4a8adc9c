//! In-process vault implementation.
//!
//! Follows the remote vault's version-stage rules closely enough to drive the
//! rotation protocol end to end: stage labels are unique per secret, a stage
//! move updates CURRENT and PREVIOUS together, request tokens make value writes
//! idempotent, and deletion honors a recovery window. Used for local
//! development and by the test suites, which can also count calls and inject
//! failures per [`VaultOperation`].

use super::client::{
    CreateRemoteSecret, DeletionMode, PutValue, RandomValueSpec, RemoteSecretRef, RotationRule,
    SecretDescription, SecretVaultClient, StageMove, ValueSelector, VaultClientFactory,
    VaultOperation, VersionedValue,
};
use super::error::{VaultError, VaultResult};
use super::types::SecretString;
use crate::domain::{VaultCredentials, VersionStage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const MIN_RECOVERY_DAYS: u32 = 7;
const MAX_RECOVERY_DAYS: u32 = 30;
const PUNCTUATION: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";
const ALPHANUMERIC: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug)]
struct StoredVersion {
    /// `None` for the placeholder created when a rotation starts
    text: Option<SecretString>,
    stages: BTreeSet<VersionStage>,
}

#[derive(Debug)]
struct StoredSecret {
    arn: String,
    name: String,
    tags: BTreeMap<String, String>,
    versions: BTreeMap<String, StoredVersion>,
    rotation: Option<(String, RotationRule)>,
    deleted_at: Option<DateTime<Utc>>,
}

impl StoredSecret {
    fn holder_of(&self, stage: VersionStage) -> Option<&str> {
        self.versions
            .iter()
            .find(|(_, v)| v.stages.contains(&stage))
            .map(|(id, _)| id.as_str())
    }

    /// Attach `stage` to `version_id`, detaching it from every other version
    fn attach_stage(&mut self, version_id: &str, stage: VersionStage) {
        for (id, version) in self.versions.iter_mut() {
            if id == version_id {
                version.stages.insert(stage);
            } else {
                version.stages.remove(&stage);
            }
        }
    }

    /// Make `version_id` CURRENT, demoting the old holder to PREVIOUS
    fn promote_current(&mut self, version_id: &str) {
        if let Some(old) = self.holder_of(VersionStage::Current).map(str::to_string) {
            if old != version_id {
                self.attach_stage(&old, VersionStage::Previous);
                if let Some(version) = self.versions.get_mut(&old) {
                    version.stages.remove(&VersionStage::Current);
                }
            }
        }
        self.attach_stage(version_id, VersionStage::Current);
        if let Some(version) = self.versions.get_mut(version_id) {
            version.stages.remove(&VersionStage::Pending);
        }
    }

    fn describe(&self) -> SecretDescription {
        SecretDescription {
            arn: self.arn.clone(),
            name: self.name.clone(),
            rotation_enabled: self.rotation.is_some(),
            rotation_function_ref: self.rotation.as_ref().map(|(f, _)| f.clone()),
            tags: self.tags.clone(),
            versions: self
                .versions
                .iter()
                .map(|(id, v)| (id.clone(), v.stages.iter().copied().collect()))
                .collect(),
            deleted: self.deleted_at.is_some(),
        }
    }
}

#[derive(Debug, Default)]
struct VaultState {
    /// Keyed by ARN
    secrets: HashMap<String, StoredSecret>,
    calls: HashMap<VaultOperation, usize>,
    failures: HashMap<VaultOperation, VecDeque<VaultError>>,
}

impl VaultState {
    fn arn_for(&self, secret_id: &str) -> VaultResult<String> {
        if self.secrets.contains_key(secret_id) {
            return Ok(secret_id.to_string());
        }
        self.secrets
            .values()
            .find(|s| s.name == secret_id)
            .map(|s| s.arn.clone())
            .ok_or_else(|| VaultError::not_found(secret_id))
    }

    fn secret(&self, secret_id: &str) -> VaultResult<&StoredSecret> {
        let arn = self.arn_for(secret_id)?;
        self.secrets.get(&arn).ok_or_else(|| VaultError::not_found(secret_id))
    }

    /// Mutable access to a secret that is not scheduled for deletion
    fn live_secret_mut(&mut self, secret_id: &str) -> VaultResult<&mut StoredSecret> {
        let arn = self.arn_for(secret_id)?;
        let secret = self.secrets.get_mut(&arn).ok_or_else(|| VaultError::not_found(secret_id))?;
        if secret.deleted_at.is_some() {
            return Err(VaultError::invalid_request(format!(
                "secret {} is scheduled for deletion",
                secret.name
            )));
        }
        Ok(secret)
    }
}

/// Vault held entirely in process memory
#[derive(Debug)]
pub struct InMemoryVault {
    region: String,
    state: Mutex<VaultState>,
}

impl Default for InMemoryVault {
    fn default() -> Self {
        Self::new("us-east-1")
    }
}

impl InMemoryVault {
    pub fn new(region: impl Into<String>) -> Self {
        Self { region: region.into(), state: Mutex::new(VaultState::default()) }
    }

    fn lock(&self) -> VaultResult<MutexGuard<'_, VaultState>> {
        self.state.lock().map_err(|_| VaultError::backend("in-memory vault lock poisoned"))
    }

    /// Count the call and pop any queued failure for `operation`
    fn enter(&self, operation: VaultOperation) -> VaultResult<MutexGuard<'_, VaultState>> {
        let mut state = self.lock()?;
        *state.calls.entry(operation).or_insert(0) += 1;
        if let Some(err) = state.failures.get_mut(&operation).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }

    /// Make the next call of `operation` fail with `error`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, operation: VaultOperation, error: VaultError) {
        if let Ok(mut state) = self.lock() {
            state.failures.entry(operation).or_default().push_back(error);
        }
    }

    /// Calls made for `operation`, including failed ones
    pub fn calls(&self, operation: VaultOperation) -> usize {
        self.lock().map(|s| s.calls.get(&operation).copied().unwrap_or(0)).unwrap_or(0)
    }

    /// Calls made across every operation
    pub fn total_calls(&self) -> usize {
        self.lock().map(|s| s.calls.values().sum()).unwrap_or(0)
    }

    /// Number of secrets held, excluding ones scheduled for deletion
    pub fn live_secret_count(&self) -> usize {
        self.lock()
            .map(|s| s.secrets.values().filter(|s| s.deleted_at.is_none()).count())
            .unwrap_or(0)
    }

    /// Whether the vault holds a secret by this name or ARN, deleted or not
    pub fn contains(&self, secret_id: &str) -> bool {
        self.lock().map(|s| s.arn_for(secret_id).is_ok()).unwrap_or(false)
    }

    fn arn(&self, name: &str) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        format!("arn:keyturn:vault:{}:local:secret:{}-{}", self.region, name, suffix)
    }
}

#[async_trait]
impl SecretVaultClient for InMemoryVault {
    async fn create_secret(&self, request: CreateRemoteSecret) -> VaultResult<RemoteSecretRef> {
        let mut state = self.enter(VaultOperation::Create)?;

        if let Some(existing) = state.secrets.values().find(|s| s.name == request.name) {
            return Err(if existing.deleted_at.is_some() {
                VaultError::invalid_request(format!(
                    "secret {} is scheduled for deletion",
                    request.name
                ))
            } else {
                VaultError::already_exists(&request.name)
            });
        }

        let arn = self.arn(&request.name);
        let version_id = Uuid::new_v4().to_string();
        let mut versions = BTreeMap::new();
        versions.insert(
            version_id.clone(),
            StoredVersion {
                text: Some(request.value.to_secret_string()),
                stages: BTreeSet::from([VersionStage::Current]),
            },
        );
        state.secrets.insert(
            arn.clone(),
            StoredSecret {
                arn: arn.clone(),
                name: request.name.clone(),
                tags: request.tags,
                versions,
                rotation: None,
                deleted_at: None,
            },
        );

        Ok(RemoteSecretRef { arn, name: request.name, version_id: Some(version_id) })
    }

    async fn describe_secret(&self, secret_id: &str) -> VaultResult<SecretDescription> {
        let state = self.enter(VaultOperation::Describe)?;
        Ok(state.secret(secret_id)?.describe())
    }

    async fn get_value(
        &self,
        secret_id: &str,
        selector: ValueSelector,
    ) -> VaultResult<VersionedValue> {
        let mut state = self.enter(VaultOperation::GetValue)?;
        let secret = state.live_secret_mut(secret_id)?;

        let (version_id, version) = match &selector {
            ValueSelector::Stage(stage) => {
                let id = secret.holder_of(*stage).map(str::to_string).ok_or_else(|| {
                    VaultError::not_found(format!("{} ({})", secret_id, stage))
                })?;
                let version =
                    secret.versions.get(&id).ok_or_else(|| VaultError::not_found(secret_id))?;
                (id, version)
            }
            ValueSelector::Version { version_id, stage } => {
                let version = secret
                    .versions
                    .get(version_id)
                    .ok_or_else(|| VaultError::not_found(format!("{}@{}", secret_id, version_id)))?;
                if let Some(stage) = stage {
                    if !version.stages.contains(stage) {
                        return Err(VaultError::not_found(format!(
                            "{}@{} ({})",
                            secret_id, version_id, stage
                        )));
                    }
                }
                (version_id.clone(), version)
            }
        };

        let text = version
            .text
            .clone()
            .ok_or_else(|| VaultError::not_found(format!("{}@{}", secret_id, version_id)))?;

        Ok(VersionedValue {
            version_id,
            stages: version.stages.iter().copied().collect(),
            text: Some(text),
            binary: None,
        })
    }

    async fn put_value(&self, secret_id: &str, value: PutValue) -> VaultResult<String> {
        let mut state = self.enter(VaultOperation::PutValue)?;
        let secret = state.live_secret_mut(secret_id)?;
        let text = value.value.to_secret_string();
        let version_id = value.request_token.unwrap_or_else(|| Uuid::new_v4().to_string());

        match secret.versions.get_mut(&version_id) {
            Some(existing) => match &existing.text {
                Some(stored) if *stored == text => return Ok(version_id),
                Some(_) => {
                    return Err(VaultError::already_exists(format!(
                        "{}@{} with a different value",
                        secret_id, version_id
                    )))
                }
                None => existing.text = Some(text),
            },
            None => {
                secret
                    .versions
                    .insert(version_id.clone(), StoredVersion { text: Some(text), stages: BTreeSet::new() });
            }
        }

        let stages =
            if value.stages.is_empty() { vec![VersionStage::Current] } else { value.stages };
        for stage in stages {
            if stage == VersionStage::Current {
                secret.promote_current(&version_id);
            } else {
                secret.attach_stage(&version_id, stage);
            }
        }

        Ok(version_id)
    }

    async fn delete_secret(&self, secret_id: &str, mode: DeletionMode) -> VaultResult<()> {
        let mut state = self.enter(VaultOperation::Delete)?;
        let arn = state.arn_for(secret_id)?;

        match mode {
            DeletionMode::Force => {
                state.secrets.remove(&arn);
            }
            DeletionMode::RecoveryWindow { days } => {
                if !(MIN_RECOVERY_DAYS..=MAX_RECOVERY_DAYS).contains(&days) {
                    return Err(VaultError::invalid_request(format!(
                        "recovery window must be between {} and {} days, got {}",
                        MIN_RECOVERY_DAYS, MAX_RECOVERY_DAYS, days
                    )));
                }
                if let Some(secret) = state.secrets.get_mut(&arn) {
                    secret.deleted_at.get_or_insert_with(Utc::now);
                }
            }
        }
        Ok(())
    }

    async fn rotate_secret(&self, secret_id: &str) -> VaultResult<String> {
        let mut state = self.enter(VaultOperation::Rotate)?;
        let secret = state.live_secret_mut(secret_id)?;

        if secret.rotation.is_none() {
            return Err(VaultError::invalid_request(format!(
                "rotation is not configured for {}",
                secret.name
            )));
        }
        let current = secret.holder_of(VersionStage::Current);
        if let Some(pending) = secret.holder_of(VersionStage::Pending) {
            if Some(pending) != current {
                return Err(VaultError::invalid_request(format!(
                    "a previous rotation of {} is not complete",
                    secret.name
                )));
            }
        }

        let token = Uuid::new_v4().to_string();
        secret.versions.insert(token.clone(), StoredVersion { text: None, stages: BTreeSet::new() });
        secret.attach_stage(&token, VersionStage::Pending);
        Ok(token)
    }

    async fn enable_rotation(
        &self,
        secret_id: &str,
        rotation_function_ref: &str,
        rule: &RotationRule,
    ) -> VaultResult<()> {
        let mut state = self.enter(VaultOperation::EnableRotation)?;
        if rotation_function_ref.trim().is_empty() {
            return Err(VaultError::invalid_request("rotation function reference is empty"));
        }
        if rule.automatically_after_days.is_none() && rule.schedule_expression.is_none() {
            return Err(VaultError::invalid_request("rotation rule has no schedule"));
        }
        let secret = state.live_secret_mut(secret_id)?;
        secret.rotation = Some((rotation_function_ref.to_string(), rule.clone()));
        Ok(())
    }

    async fn random_value(&self, spec: &RandomValueSpec) -> VaultResult<SecretString> {
        drop(self.enter(VaultOperation::RandomValue)?);

        let alphabet: Vec<char> = ALPHANUMERIC
            .chars()
            .chain(PUNCTUATION.chars().filter(|_| !spec.exclude_punctuation))
            .filter(|c| !spec.exclude_characters.contains(*c))
            .collect();
        if alphabet.is_empty() || spec.length == 0 {
            return Err(VaultError::invalid_request("random value spec leaves nothing to draw"));
        }

        let mut rng = rand::thread_rng();
        let value: String =
            (0..spec.length).map(|_| alphabet[rng.gen_range(0..alphabet.len())]).collect();
        Ok(SecretString::new(value))
    }

    async fn move_version_stage(&self, secret_id: &str, stage_move: StageMove) -> VaultResult<()> {
        let mut state = self.enter(VaultOperation::MoveStage)?;
        let secret = state.live_secret_mut(secret_id)?;
        let StageMove { stage, move_to, remove_from } = stage_move;

        let holder = secret.holder_of(stage).map(str::to_string);
        if let Some(remove_from) = &remove_from {
            if holder.as_deref() != Some(remove_from.as_str()) {
                return Err(VaultError::invalid_request(format!(
                    "{} is not attached to version {}",
                    stage, remove_from
                )));
            }
        } else if holder.is_some() && move_to.is_some() && holder != move_to {
            return Err(VaultError::invalid_request(format!(
                "{} is attached to another version; name it in remove_from",
                stage
            )));
        }

        match move_to {
            Some(target) => {
                if !secret.versions.contains_key(&target) {
                    return Err(VaultError::not_found(format!("{}@{}", secret_id, target)));
                }
                if stage == VersionStage::Current {
                    secret.promote_current(&target);
                } else {
                    secret.attach_stage(&target, stage);
                }
            }
            None => {
                if stage == VersionStage::Current {
                    return Err(VaultError::invalid_request("CURRENT cannot be detached"));
                }
                if let Some(version) = remove_from.and_then(|id| secret.versions.get_mut(&id)) {
                    version.stages.remove(&stage);
                }
            }
        }
        Ok(())
    }
}

/// Hands out the same in-memory vault regardless of credentials
#[derive(Debug, Clone)]
pub struct InMemoryVaultFactory {
    vault: Arc<InMemoryVault>,
}

impl InMemoryVaultFactory {
    pub fn new(vault: Arc<InMemoryVault>) -> Self {
        Self { vault }
    }

    pub fn vault(&self) -> &Arc<InMemoryVault> {
        &self.vault
    }
}

#[async_trait]
impl VaultClientFactory for InMemoryVaultFactory {
    async fn client(
        &self,
        credentials: &VaultCredentials,
        _region: &str,
    ) -> VaultResult<Arc<dyn SecretVaultClient>> {
        if !credentials.is_complete() {
            return Err(VaultError::authentication_failed("incomplete vault credentials"));
        }
        let client: Arc<dyn SecretVaultClient> = self.vault.clone();
        Ok(client)
    }
}
