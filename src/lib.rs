//! # Keyturn
//!
//! Secret lifecycle and rotation engine. Keyturn keeps local secret metadata
//! consistent with a remote secret vault, rotates credentials through the
//! vault's four-step rotation protocol, and deploys the per-scope rotation
//! function with an external provisioning tool.
//!
//! ## Architecture
//!
//! ```text
//! CLI ─→ SecretService ──────→ SecretRecordStore (PostgreSQL)
//!   │          └─────────────→ SecretVaultClient (per-scope credentials)
//!   ├──→ RotationHandler ────→ RotationStrategyRegistry ─→ target systems
//!   └──→ DeploymentService ──→ Provisioner (background, one per scope)
//! ```
//!
//! ## Core Components
//!
//! - **services**: lifecycle ordering, compensation and deployment state machine
//! - **rotation**: the four-step protocol and per-type strategies
//! - **secrets**: the vault interface with AWS and in-memory implementations
//! - **storage**: SQLx repositories for secret metadata and scope configuration

pub mod cli;
pub mod config;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod rotation;
pub mod secrets;
pub mod services;
pub mod startup;
pub mod storage;

// Re-export commonly used types and traits
pub use config::AppConfig;
pub use errors::{KeyturnError, Result};
pub use startup::Engine;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
