//! Password rotation for database users
//!
//! [`DatabasePasswordStrategy`] drives the protocol. A [`CredentialTarget`]
//! knows how to change and check a password on one kind of database server.
//! The same strategy serves relational and document-store credentials; only
//! the target differs.

use super::strategy::{RotationContext, RotationStrategy};
use crate::domain::SecretType;
use crate::errors::{KeyturnError, Result};
use crate::secrets::{RandomValueSpec, SecretPayload, SecretString};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::{ConnectOptions, Connection, PgConnection};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const PASSWORD_KEY: &str = "password";
const POSTGRES_ENGINES: [&str; 3] = ["postgres", "postgresql", "aurora-postgresql"];

/// Connection details carried in a database credential payload
#[derive(Clone)]
pub struct DatabaseLogin {
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: SecretString,
    pub dbname: Option<String>,
    pub engine: Option<String>,
    pub ssl: bool,
}

impl fmt::Debug for DatabaseLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseLogin")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("dbname", &self.dbname)
            .field("engine", &self.engine)
            .field("ssl", &self.ssl)
            .finish_non_exhaustive()
    }
}

impl DatabaseLogin {
    /// Read `host`, `port`, `username`, `password`, `dbname`, `engine` and
    /// `ssl` from a payload. `port` may be a number or a numeric string.
    pub fn from_payload(payload: &SecretPayload) -> Result<Self> {
        let required = |key: &str| {
            payload
                .get_str(key)
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    KeyturnError::invalid_configuration(format!(
                        "Database credential is missing '{}'",
                        key
                    ))
                })
        };

        let port = match payload.get("port") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Some(Value::String(s)) => s.trim().parse::<u16>().ok(),
            Some(_) => None,
        };
        if payload.get("port").is_some_and(|v| !v.is_null()) && port.is_none() {
            return Err(KeyturnError::invalid_configuration(
                "Database credential has an invalid 'port'",
            ));
        }

        let ssl = match payload.get("ssl") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
            _ => false,
        };

        Ok(Self {
            host: required("host")?,
            port,
            username: required("username")?,
            password: SecretString::new(payload.get_str(PASSWORD_KEY).unwrap_or_default()),
            dbname: payload.get_str("dbname").map(str::to_string),
            engine: payload.get_str("engine").map(str::to_string),
            ssl,
        })
    }
}

/// A database server whose user passwords can be changed
#[async_trait]
pub trait CredentialTarget: Send + Sync + fmt::Debug {
    /// Short label used in logs
    fn kind(&self) -> &'static str;

    /// Connect with `login` and set `username`'s password to `password`
    async fn set_password(
        &self,
        login: &DatabaseLogin,
        username: &str,
        password: &SecretString,
    ) -> Result<()>;

    /// Connect with `login` and run a trivial query
    async fn verify(&self, login: &DatabaseLogin) -> Result<()>;
}

/// Rotates the `password` field of a database credential
#[derive(Debug)]
pub struct DatabasePasswordStrategy {
    secret_type: SecretType,
    target: Arc<dyn CredentialTarget>,
    spec: RandomValueSpec,
}

impl DatabasePasswordStrategy {
    pub fn new(secret_type: SecretType, target: Arc<dyn CredentialTarget>) -> Self {
        Self { secret_type, target, spec: RandomValueSpec::database_password() }
    }

    async fn set_with_fallback(
        &self,
        ctx: &RotationContext<'_>,
        current: &SecretPayload,
        pending: &DatabaseLogin,
    ) -> Result<()> {
        let login = DatabaseLogin::from_payload(current)?;
        let first = self.target.set_password(&login, &pending.username, &pending.password).await;
        let Err(current_err) = first else {
            return Ok(());
        };

        // The target may still be on the previous password if an earlier
        // cycle failed between setSecret and finishSecret.
        let Some(previous) = ctx.previous_value().await? else {
            return Err(current_err);
        };
        warn!(
            secret_id = %ctx.secret_id,
            target = self.target.kind(),
            error = %current_err,
            "Current login rejected; retrying with the previous login"
        );
        let login = DatabaseLogin::from_payload(&previous)?;
        self.target.set_password(&login, &pending.username, &pending.password).await
    }
}

#[async_trait]
impl RotationStrategy for DatabasePasswordStrategy {
    fn secret_type(&self) -> SecretType {
        self.secret_type
    }

    async fn create_secret(&self, ctx: &RotationContext<'_>, current: &SecretPayload) -> Result<()> {
        DatabaseLogin::from_payload(current)?;
        let password = ctx.random_value(&self.spec).await?;
        ctx.store_pending(current.with_secret_field(PASSWORD_KEY, &password)).await
    }

    async fn set_secret(
        &self,
        ctx: &RotationContext<'_>,
        pending: &SecretPayload,
        current: &SecretPayload,
    ) -> Result<()> {
        let pending_login = DatabaseLogin::from_payload(pending)?;

        if self.target.verify(&pending_login).await.is_ok() {
            info!(
                secret_id = %ctx.secret_id,
                target = self.target.kind(),
                "Pending password already active on target"
            );
            return Ok(());
        }

        self.set_with_fallback(ctx, current, &pending_login).await?;
        info!(
            secret_id = %ctx.secret_id,
            target = self.target.kind(),
            username = %pending_login.username,
            "Set pending password on target"
        );
        Ok(())
    }

    async fn test_secret(&self, ctx: &RotationContext<'_>, pending: &SecretPayload) -> Result<()> {
        let login = DatabaseLogin::from_payload(pending)?;
        self.target.verify(&login).await?;
        info!(secret_id = %ctx.secret_id, target = self.target.kind(), "Pending login verified");
        Ok(())
    }
}

/// Quote an identifier for interpolation into DDL
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal for interpolation into DDL
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// PostgreSQL and Aurora PostgreSQL servers
#[derive(Debug, Clone)]
pub struct PostgresTarget {
    connect_timeout: Duration,
}

impl PostgresTarget {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn connect_options(login: &DatabaseLogin) -> Result<PgConnectOptions> {
        if let Some(engine) = login.engine.as_deref() {
            if !POSTGRES_ENGINES.contains(&engine.to_ascii_lowercase().as_str()) {
                return Err(KeyturnError::invalid_configuration(format!(
                    "Unsupported database engine '{}'",
                    engine
                )));
            }
        }

        let options = PgConnectOptions::new()
            .host(&login.host)
            .port(login.port.unwrap_or(5432))
            .username(&login.username)
            .password(login.password.expose_secret())
            .database(login.dbname.as_deref().unwrap_or("postgres"))
            .ssl_mode(if login.ssl { PgSslMode::Require } else { PgSslMode::Prefer })
            .disable_statement_logging();
        Ok(options)
    }

    async fn connect(&self, login: &DatabaseLogin) -> Result<PgConnection> {
        let options = Self::connect_options(login)?;
        let connect = PgConnection::connect_with(&options);
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(KeyturnError::upstream(
                "connect to database",
                format!("{}@{}: {}", login.username, login.host, e),
            )),
            Err(_) => Err(KeyturnError::upstream(
                "connect to database",
                format!("{}@{}: timed out after {:?}", login.username, login.host, self.connect_timeout),
            )),
        }
    }
}

#[async_trait]
impl CredentialTarget for PostgresTarget {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn set_password(
        &self,
        login: &DatabaseLogin,
        username: &str,
        password: &SecretString,
    ) -> Result<()> {
        let mut conn = self.connect(login).await?;
        let statement = format!(
            "ALTER USER {} WITH PASSWORD {}",
            quote_ident(username),
            quote_literal(password.expose_secret())
        );
        let result = sqlx::query(&statement).execute(&mut conn).await;
        let _ = conn.close().await;
        result
            .map(|_| ())
            .map_err(|e| KeyturnError::upstream("set database password", e))
    }

    async fn verify(&self, login: &DatabaseLogin) -> Result<()> {
        let mut conn = self.connect(login).await?;
        let result: std::result::Result<i32, sqlx::Error> =
            sqlx::query_scalar("SELECT 1").fetch_one(&mut conn).await;
        let _ = conn.close().await;
        result
            .map(|_| ())
            .map_err(|e| KeyturnError::upstream("verify database login", e))
    }
}

/// DocumentDB / MongoDB-compatible clusters
#[cfg(feature = "documentdb")]
#[derive(Debug, Clone)]
pub struct DocumentDbTarget {
    connect_timeout: Duration,
}

#[cfg(feature = "documentdb")]
impl DocumentDbTarget {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn client(&self, login: &DatabaseLogin) -> Result<mongodb::Client> {
        use mongodb::options::{ClientOptions, Credential, ServerAddress, Tls, TlsOptions};

        let address = ServerAddress::parse(format!("{}:{}", login.host, login.port.unwrap_or(27017)))
            .map_err(|e| KeyturnError::invalid_configuration(format!("Invalid cluster address: {}", e)))?;

        let mut credential = Credential::default();
        credential.username = Some(login.username.clone());
        credential.password = Some(login.password.expose_secret().to_string());
        credential.source = Some("admin".to_string());

        let mut options = ClientOptions::default();
        options.hosts = vec![address];
        options.credential = Some(credential);
        options.direct_connection = Some(true);
        options.retry_writes = Some(false);
        options.connect_timeout = Some(self.connect_timeout);
        options.server_selection_timeout = Some(self.connect_timeout);
        if login.ssl {
            options.tls = Some(Tls::Enabled(TlsOptions::default()));
        }

        mongodb::Client::with_options(options)
            .map_err(|e| KeyturnError::upstream("connect to document cluster", e))
    }
}

#[cfg(feature = "documentdb")]
#[async_trait]
impl CredentialTarget for DocumentDbTarget {
    fn kind(&self) -> &'static str {
        "documentdb"
    }

    async fn set_password(
        &self,
        login: &DatabaseLogin,
        username: &str,
        password: &SecretString,
    ) -> Result<()> {
        use mongodb::bson::doc;

        let client = self.client(login)?;
        client
            .database("admin")
            .run_command(doc! { "updateUser": username, "pwd": password.expose_secret() })
            .await
            .map(|_| ())
            .map_err(|e| KeyturnError::upstream("set document cluster password", e))
    }

    async fn verify(&self, login: &DatabaseLogin) -> Result<()> {
        use mongodb::bson::doc;

        let client = self.client(login)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| KeyturnError::upstream("verify document cluster login", e))
    }
}
