//! Error types for git-workbench
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `Display` and `Error` impls.
//! Messages are written for people: every variant except the generic catch-all
//! says what went wrong and what to do next.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for git-workbench
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Git(#[from] GitError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a (possibly transient) lock-file conflict
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Error::Git(GitError::LockContention(_)))
    }
}

/// Git operation errors
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("Repository handle for {0} has been closed")]
    Closed(PathBuf),

    #[error("No repository is open")]
    NoCurrentRepository,

    #[error("Another git process holds a lock: {0}")]
    LockContention(String),

    #[error(
        "Repository at {0} is locked by another git process. Close other git tools and try again."
    )]
    RepositoryLocked(PathBuf),

    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("Push rejected: remote has changes you don't have locally. Pull first. ({0})")]
    NonFastForward(String),

    #[error("Push rejected for {refname}: {reason}")]
    RemoteRejected { refname: String, reason: String },

    #[error("Push may not have completed: {0}")]
    PushIncomplete(String),

    #[error("Repository not found: {0}. Check the URL and your access rights.")]
    RepositoryNotFound(String),

    #[error("Connection timed out: {0}. Check your network connection.")]
    ConnectionTimeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Merge failed: {0}")]
    MergeFailed(String),

    #[error("{0} was cancelled")]
    Cancelled(String),

    #[error("Nothing to commit. Stage changes first or allow an empty commit.")]
    NothingToCommit,

    #[error("Commit message cannot be empty")]
    EmptyCommitMessage,

    #[error("No local changes to stash")]
    NothingToStash,

    #[error("Cannot delete '{0}' while it is checked out. Switch to another branch first.")]
    BranchCheckedOut(String),

    #[error("Branch '{0}' not found")]
    BranchNotFound(String),

    #[error("Branch '{0}' is not fully merged. Use force to delete it anyway.")]
    BranchNotMerged(String),

    #[error("Remote '{0}' not found")]
    RemoteNotFound(String),

    #[error("Invalid reference: {0}")]
    InvalidRef(String),

    #[error("Git operation failed: {0}")]
    OperationFailed(String),
}

impl From<git2::Error> for GitError {
    fn from(e: git2::Error) -> Self {
        match e.code() {
            git2::ErrorCode::Locked => GitError::LockContention(e.message().to_string()),
            _ if is_lock_message(e.message()) => GitError::LockContention(e.message().to_string()),
            _ => GitError::OperationFailed(e.message().to_string()),
        }
    }
}

impl From<git2::Error> for Error {
    fn from(e: git2::Error) -> Self {
        Error::Git(e.into())
    }
}

/// libgit2 does not always tag lock failures with `GIT_ELOCKED`
fn is_lock_message(message: &str) -> bool {
    message.contains(".lock'") || message.contains("could not lock")
}

/// Credential storage errors
///
/// These never cross the credential store's lookup boundary: a failed unseal
/// is reported to callers as "no credentials".
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Encryption key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("Failed to encrypt credentials")]
    Encryption,

    #[error("Failed to decrypt credentials")]
    Decryption,

    #[error("Failed to serialize credentials: {0}")]
    Serialization(String),

    #[error("Failed to persist preferences: {0}")]
    Storage(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to create config directory: {0}")]
    DirectoryCreationFailed(PathBuf),
}

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GitError::NotARepository(PathBuf::from("/tmp/foo"));
        assert!(err.to_string().contains("/tmp/foo"));

        let err = GitError::NonFastForward("refs/heads/main".to_string());
        assert!(err.to_string().contains("Pull first"));

        let err = CredentialError::Decryption;
        assert!(err.to_string().contains("decrypt"));
    }

    #[test]
    fn test_error_conversion() {
        let git_err = GitError::NothingToCommit;
        let top: Error = git_err.into();
        assert!(matches!(top, Error::Git(GitError::NothingToCommit)));

        let cfg_err = ConfigError::LoadFailed("x".to_string());
        let _top_err: Error = cfg_err.into();
    }

    #[test]
    fn test_locked_git2_error_maps_to_contention() {
        let raw = git2::Error::new(
            git2::ErrorCode::Locked,
            git2::ErrorClass::Index,
            "failed to create locked file '/repo/.git/index.lock': File exists",
        );
        let err: Error = raw.into();
        assert!(err.is_lock_contention());

        let raw = git2::Error::new(
            git2::ErrorCode::GenericError,
            git2::ErrorClass::Os,
            "could not find repository",
        );
        let err: Error = raw.into();
        assert!(!err.is_lock_contention());
    }
}
