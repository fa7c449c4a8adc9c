//! # Command Line Interface
//!
//! Database management, scope and secret administration, rotation step
//! invocation and rotation-function deployment.

use crate::config::AppConfig;
use crate::domain::{
    BackendScopeConfig, CreateSecretRequest, RotationEvent, ScopeId, SecretId,
    UpdateSecretRequest, VaultCredentials,
};
use crate::observability::{init_observability, log_config_info};
use crate::startup::Engine;
use crate::storage::{list_applied_migrations, run_db_migrations, validate_migrations, MigrationInfo};
use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "keyturn")]
#[command(about = "Secret lifecycle and rotation engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database URL override
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Database management commands
    Database {
        #[command(subcommand)]
        command: DatabaseCommands,
    },

    /// Backend scope administration
    Scope {
        #[command(subcommand)]
        command: ScopeCommands,
    },

    /// Secret lifecycle commands
    Secret {
        #[command(subcommand)]
        command: SecretCommands,
    },

    /// Run one rotation step, as invoked by the vault
    Rotate {
        /// Event JSON (`{"Step": ..., "SecretId": ..., "ClientRequestToken": ...}`) or @file
        #[arg(long)]
        event: String,
    },

    /// Deploy the rotation function for a scope and wait for the outcome
    Deploy { scope_id: String },

    /// Tear down the rotation function for a scope and wait for the outcome
    Remove { scope_id: String },

    /// Show the rotation function deployment state of a scope
    Status { scope_id: String },
}

#[derive(Subcommand)]
pub enum DatabaseCommands {
    /// Run pending migrations
    Migrate,

    /// Exit non-zero if migrations are pending
    Status,

    /// List all applied migrations
    List,
}

#[derive(Subcommand)]
pub enum ScopeCommands {
    /// Create or update a scope
    Put {
        scope_id: String,

        #[arg(long)]
        region: Option<String>,

        #[arg(long, requires = "secret_access_key")]
        access_key_id: Option<String>,

        #[arg(long, requires = "access_key_id")]
        secret_access_key: Option<String>,

        /// Set the rotation function reference by hand
        #[arg(long)]
        rotation_function: Option<String>,
    },

    /// Show a scope (credentials redacted)
    Show { scope_id: String },
}

#[derive(Subcommand)]
pub enum SecretCommands {
    /// Create a secret from a JSON request or @file
    Create {
        #[arg(long)]
        request: String,
    },

    Get {
        id: String,

        /// Include the current value
        #[arg(long)]
        with_value: bool,
    },

    List {
        #[arg(long)]
        scope_id: String,
    },

    /// Update value and/or description from a JSON request or @file
    Update {
        id: String,

        #[arg(long)]
        request: String,
    },

    Delete {
        id: String,

        /// Skip the vault's recovery window
        #[arg(long)]
        force: bool,
    },

    /// Start a rotation now
    Rotate { id: String },
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::from_env().context("Failed to load configuration")?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    if cli.verbose && std::env::var("RUST_LOG").is_err() {
        config.observability.log_level = "debug".to_string();
    }

    let metrics = init_observability(&config.observability)?;
    log_config_info(&config);

    match cli.command {
        Commands::Database { command } => {
            let mut database = config.database.clone();
            database.auto_migrate = false;
            let pool = crate::storage::create_pool(&database).await?;
            handle_database_command(command, &pool).await
        }
        command => {
            let engine = Engine::build(&config, metrics).await?;
            handle_engine_command(command, &engine).await
        }
    }
}

async fn handle_database_command(
    command: DatabaseCommands,
    pool: &crate::storage::DbPool,
) -> anyhow::Result<()> {
    match command {
        DatabaseCommands::Migrate => {
            println!("Running database migrations...");
            run_db_migrations(pool).await?;
            println!("Migrations completed successfully");
        }
        DatabaseCommands::Status => {
            if validate_migrations(pool).await? {
                println!("Database schema is up to date");
            } else {
                anyhow::bail!("Database schema has pending migrations");
            }
        }
        DatabaseCommands::List => {
            let migrations = list_applied_migrations(pool).await?;
            if migrations.is_empty() {
                println!("No migrations have been applied");
            } else {
                print_migrations_table(&migrations);
            }
        }
    }
    Ok(())
}

async fn handle_engine_command(command: Commands, engine: &Engine) -> anyhow::Result<()> {
    match command {
        Commands::Database { command } => handle_database_command(command, &engine.pool).await,
        Commands::Scope { command } => handle_scope_command(command, engine).await,
        Commands::Secret { command } => handle_secret_command(command, engine).await,
        Commands::Rotate { event } => {
            let event: RotationEvent = read_json_arg(&event).context("Invalid rotation event")?;
            engine.rotation.handle(&event).await?;
            println!("{} completed for {}", event.step, event.secret_id);
            Ok(())
        }
        Commands::Deploy { scope_id } => {
            let ticket = engine.deployments.deploy(&ScopeId::from_str_unchecked(&scope_id)).await?;
            finish_deployment(engine, ticket).await
        }
        Commands::Remove { scope_id } => {
            let ticket = engine.deployments.remove(&ScopeId::from_str_unchecked(&scope_id)).await?;
            finish_deployment(engine, ticket).await
        }
        Commands::Status { scope_id } => {
            let state = engine.deployments.status(&ScopeId::from_str_unchecked(&scope_id)).await?;
            print_json(&state)
        }
    }
}

/// The provisioning child is killed if the process exits, so the CLI always
/// waits for the terminal status
async fn finish_deployment(
    engine: &Engine,
    ticket: crate::services::DeploymentTicket,
) -> anyhow::Result<()> {
    let scope_id = ticket.scope_id.clone();
    println!("{} accepted for scope {}", ticket.operation.as_str(), scope_id);
    let status = ticket.wait().await?;
    print_json(&engine.deployments.status(&scope_id).await?)?;
    if status == crate::domain::DeploymentStatus::Failed {
        anyhow::bail!("Provisioning failed for scope {}", scope_id);
    }
    Ok(())
}

async fn handle_scope_command(command: ScopeCommands, engine: &Engine) -> anyhow::Result<()> {
    match command {
        ScopeCommands::Put {
            scope_id,
            region,
            access_key_id,
            secret_access_key,
            rotation_function,
        } => {
            let scope_id = ScopeId::from_str_unchecked(&scope_id);
            let existing = engine.scopes.get(&scope_id).await?;
            let mut scope = match existing {
                Some(scope) => scope,
                None => BackendScopeConfig::new(
                    scope_id.clone(),
                    region.clone().context("--region is required for a new scope")?,
                ),
            };
            if let Some(region) = region {
                scope.default_region = region;
            }
            if let (Some(id), Some(secret)) = (access_key_id, secret_access_key) {
                scope.credentials = Some(VaultCredentials::new(id, secret));
            }
            if let Some(function) = rotation_function {
                scope.rotation_function_ref = Some(function);
            }
            print_json(&engine.scopes.upsert(&scope).await?)
        }
        ScopeCommands::Show { scope_id } => {
            let scope_id = ScopeId::from_str_unchecked(&scope_id);
            let scope = engine
                .scopes
                .get(&scope_id)
                .await?
                .with_context(|| format!("Scope '{}' not found", scope_id))?;
            print_json(&scope)
        }
    }
}

async fn handle_secret_command(command: SecretCommands, engine: &Engine) -> anyhow::Result<()> {
    let service = &engine.secrets;
    match command {
        SecretCommands::Create { request } => {
            let request: CreateSecretRequest =
                read_json_arg(&request).context("Invalid create request")?;
            print_json(&service.create_secret(request).await?)
        }
        SecretCommands::Get { id, with_value } => {
            let id = SecretId::from_str_unchecked(&id);
            if with_value {
                print_json(&service.get_secret_with_value(&id).await?)
            } else {
                print_json(&service.get_secret(&id).await?)
            }
        }
        SecretCommands::List { scope_id } => {
            print_json(&service.list_secrets(&ScopeId::from_str_unchecked(&scope_id)).await?)
        }
        SecretCommands::Update { id, request } => {
            let request: UpdateSecretRequest =
                read_json_arg(&request).context("Invalid update request")?;
            print_json(&service.update_secret(&SecretId::from_str_unchecked(&id), request).await?)
        }
        SecretCommands::Delete { id, force } => {
            service.delete_secret(&SecretId::from_str_unchecked(&id), force).await?;
            println!("Secret {} deleted", id);
            Ok(())
        }
        SecretCommands::Rotate { id } => {
            print_json(&service.rotate_secret(&SecretId::from_str_unchecked(&id)).await?)
        }
    }
}

/// Parse a JSON argument given inline or as `@path`
fn read_json_arg<T: DeserializeOwned>(arg: &str) -> anyhow::Result<T> {
    let raw = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path))?,
        None => arg.to_string(),
    };
    Ok(serde_json::from_str(&raw)?)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_migrations_table(migrations: &[MigrationInfo]) {
    println!("{:<15} {:<50} {:<25} {:<10}", "Version", "Description", "Applied On", "Time (ms)");
    println!("{}", "-".repeat(100));

    for migration in migrations {
        println!(
            "{:<15} {:<50} {:<25} {:<10}",
            migration.version,
            truncate_string(&migration.description, 48),
            migration.installed_on.format("%Y-%m-%d %H:%M:%S"),
            migration.execution_time / 1_000_000
        );
    }
}

/// Truncate a string to a maximum length
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RotationStep;
    use std::io::Write;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["keyturn", "deploy", "tenant-a"]).unwrap();
        assert!(matches!(cli.command, Commands::Deploy { scope_id } if scope_id == "tenant-a"));

        let cli = Cli::try_parse_from(["keyturn", "secret", "delete", "abc", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Secret { command: SecretCommands::Delete { force: true, .. } }
        ));
    }

    #[test]
    fn test_scope_credentials_come_in_pairs() {
        let result = Cli::try_parse_from([
            "keyturn",
            "scope",
            "put",
            "tenant-a",
            "--access-key-id",
            "AKIA1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_read_json_arg_inline_and_file() {
        let inline: RotationEvent = read_json_arg(
            r#"{"Step":"testSecret","SecretId":"arn:s","ClientRequestToken":"t"}"#,
        )
        .unwrap();
        assert_eq!(inline.step, RotationStep::TestSecret);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"Step":"finishSecret","SecretId":"arn:s","ClientRequestToken":"t"}}"#)
            .unwrap();
        let from_file: RotationEvent =
            read_json_arg(&format!("@{}", file.path().display())).unwrap();
        assert_eq!(from_file.step, RotationStep::FinishSecret);
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("a much longer description", 10), "a much ...");
    }
}
