//! PostgreSQL repository tests
//!
//! Run with `--features postgres_tests`; each test starts its own container.

#![cfg(feature = "postgres_tests")]

mod common;

use common::test_db::TestDatabase;
use common::*;
use keyturn::domain::{
    BackendScopeConfig, DeploymentStatus, NewSecretRecord, RotationSchedule, SecretType,
    StorageMode,
};
use keyturn::secrets::SecretPayload;
use keyturn::services::SecretEncryption;
use keyturn::storage::{
    list_applied_migrations, DeploymentClaim, DeploymentUpdate, FunctionRefChange,
    ScopeConfigStore, SecretRecordStore, SqlxScopeRepository, SqlxSecretRepository,
};
use std::sync::Arc;

struct Repos {
    db: TestDatabase,
    scopes: SqlxScopeRepository,
    secrets: SqlxSecretRepository,
}

async fn repos(prefix: &str) -> Repos {
    let db = TestDatabase::new(prefix).await;
    let encryption = Arc::new(SecretEncryption::for_testing());
    let scopes = SqlxScopeRepository::new(db.pool.clone(), encryption.clone());
    let secrets = SqlxSecretRepository::new(db.pool.clone(), encryption);
    scopes.upsert(&rotating_scope()).await.unwrap();
    Repos { db, scopes, secrets }
}

fn remote_record(name: &str) -> NewSecretRecord {
    NewSecretRecord {
        scope_id: scope_id(),
        name: name.to_string(),
        secret_type: SecretType::RdsCredentials,
        storage_mode: StorageMode::Remote,
        remote_ref: Some(format!("arn:aws:secretsmanager:us-east-1:123456789012:secret:{}", name)),
        region: REGION.to_string(),
        rotation_enabled: true,
        rotation_schedule: Some(RotationSchedule::EveryDays(30)),
        description: Some("primary database".to_string()),
        local_value: None,
    }
}

#[tokio::test]
async fn test_migrations_are_recorded() {
    let r = repos("migrations").await;
    let applied = list_applied_migrations(&r.db.pool).await.unwrap();
    assert_eq!(applied.len(), 2);
}

#[tokio::test]
async fn test_secret_record_round_trip() {
    let r = repos("secret_round_trip").await;
    let created = r.secrets.insert(remote_record("db-1")).await.unwrap();

    let loaded = r.secrets.get(&created.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "db-1");
    assert_eq!(loaded.secret_type, SecretType::RdsCredentials);
    assert_eq!(loaded.rotation_schedule, Some(RotationSchedule::EveryDays(30)));

    let remote_ref = created.remote_ref.as_deref().unwrap();
    let by_ref = r.secrets.find_by_remote_ref(remote_ref).await.unwrap();
    assert_eq!(by_ref.map(|s| s.id), Some(created.id.clone()));

    let stamped = r.secrets.mark_rotated(&created.id, chrono::Utc::now()).await.unwrap();
    assert!(stamped.last_rotated_at.is_some());

    assert!(r.secrets.delete(&created.id).await.unwrap());
    assert!(r.secrets.get(&created.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_name_in_scope_is_conflict() {
    let r = repos("secret_unique").await;
    r.secrets.insert(remote_record("db-1")).await.unwrap();

    let mut duplicate = remote_record("db-1");
    duplicate.remote_ref = Some("arn:other".to_string());
    let err = r.secrets.insert(duplicate).await.unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_local_value_is_encrypted_at_rest() {
    let r = repos("local_value").await;
    let created = r
        .secrets
        .insert(NewSecretRecord {
            storage_mode: StorageMode::Local,
            remote_ref: None,
            rotation_enabled: false,
            rotation_schedule: None,
            local_value: Some(SecretPayload::single("value", "plaintext-marker")),
            ..remote_record("local")
        })
        .await
        .unwrap();

    let raw: Vec<u8> = sqlx::query_scalar("SELECT value_ciphertext FROM secrets WHERE id = $1")
        .bind(created.id.as_str())
        .fetch_one(&r.db.pool)
        .await
        .unwrap();
    assert!(!String::from_utf8_lossy(&raw).contains("plaintext-marker"));

    let value = r.secrets.load_local_value(&created.id).await.unwrap().unwrap();
    assert_eq!(value.get_str("value"), Some("plaintext-marker"));
}

#[tokio::test]
async fn test_scope_credentials_and_deployment_status() {
    let r = repos("scope").await;
    let scope = r.scopes.get(&scope_id()).await.unwrap().unwrap();
    let credentials = scope.usable_credentials().unwrap();
    assert_eq!(credentials.secret_access_key.expose_secret(), "tenant-secret-key");

    r.scopes
        .record_deployment(
            &scope_id(),
            DeploymentUpdate::status(DeploymentStatus::Deployed)
                .with_function_ref(FunctionRefChange::Set("arn:fn:new".to_string())),
        )
        .await
        .unwrap();

    // upsert keeps the deployment status of an existing scope
    r.scopes.upsert(&BackendScopeConfig::new(scope_id(), "eu-west-1")).await.unwrap();
    let scope = r.scopes.get(&scope_id()).await.unwrap().unwrap();
    assert_eq!(scope.deployment_status, DeploymentStatus::Deployed);
    assert_eq!(scope.default_region, "eu-west-1");
    assert!(scope.credentials.is_none());
}

#[tokio::test]
async fn test_claim_deployment_admits_one_writer() {
    let r = repos("claim").await;
    let snapshot = DeploymentClaim::of(&r.scopes.get(&scope_id()).await.unwrap().unwrap());

    let scope = scope_id();
    let (a, b) = tokio::join!(
        r.scopes.claim_deployment(&scope, snapshot, DeploymentStatus::Deploying),
        r.scopes.claim_deployment(&scope, snapshot, DeploymentStatus::Removing),
    );

    assert_eq!([a.unwrap(), b.unwrap()].iter().filter(|won| **won).count(), 1);
    let status = r.scopes.get(&scope_id()).await.unwrap().unwrap().deployment_status;
    assert!(status.is_in_flight());
}
