//! git-workbench - local Git repository management
//!
//! A library for driving many local repositories from a front end: open,
//! clone and initialize repositories, inspect and change their working state,
//! talk to remotes with stored credentials, and observe status as it changes.
//!
//! # Architecture
//!
//! - **RepositoryOrchestrator** - owns the handle registry and the "current"
//!   repository, resolves credentials and publishes observable state
//! - **RepositoryHandle** - every git operation on one working directory
//! - **CredentialStore** - identity, encrypted host-keyed credentials and settings
//! - **parse_hunks** - unified diff text to structured hunks
//!
//! # Modules
//!
//! - [`orchestrator`] - Registry, tri-state outcomes, published state
//! - [`git`] - libgit2-backed repository operations
//! - [`credentials`] - Credential sealing and preference-backed settings
//! - [`config`] - Configuration and preference persistence
//! - [`error`] - Error types

pub mod config;
pub mod credentials;
pub mod error;
pub mod git;
pub mod orchestrator;

pub use config::{Config, PreferenceStore};
pub use credentials::{CredentialStore, Credentials, FileKeyVault, Identity, KeyVault};
pub use error::{Error, Result};
pub use git::RepositoryHandle;
pub use orchestrator::{GitOutcome, RepositoryOrchestrator};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
