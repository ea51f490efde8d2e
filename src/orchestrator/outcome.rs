//! Tri-state result of orchestrator operations

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::git::{OperationKind, OperationProgress};

/// Outcome of a public orchestrator operation
///
/// Errors never escape as panics or `Err`; callers match on the three states.
#[derive(Debug, Clone)]
pub enum GitOutcome<T> {
    Success {
        message: Option<String>,
        data: T,
    },
    Error {
        message: String,
        cause: Option<Arc<Error>>,
    },
    /// Another network operation is running; this request was not started
    InProgress {
        operation: OperationKind,
        progress: Option<OperationProgress>,
    },
}

impl<T> GitOutcome<T> {
    pub fn success(data: T) -> Self {
        Self::Success {
            message: None,
            data,
        }
    }

    pub fn success_with(message: impl Into<String>, data: T) -> Self {
        Self::Success {
            message: Some(message.into()),
            data,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            cause: None,
        }
    }

    pub fn from_error(error: Error) -> Self {
        Self::Error {
            message: error.to_string(),
            cause: Some(Arc::new(error)),
        }
    }

    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(e) => Self::from_error(e),
        }
    }

    /// Like [`Self::from_result`] with a message attached on success
    pub fn from_result_with(result: Result<T>, message: impl Into<String>) -> Self {
        match result {
            Ok(data) => Self::success_with(message, data),
            Err(e) => Self::from_error(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::InProgress { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Self::Success { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Success message or error message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success { message, .. } => message.as_deref(),
            Self::Error { message, .. } => Some(message),
            Self::InProgress { .. } => None,
        }
    }

    /// Typed error behind an `Error` outcome
    pub fn cause(&self) -> Option<&Error> {
        match self {
            Self::Error { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> GitOutcome<U> {
        match self {
            Self::Success { message, data } => GitOutcome::Success {
                message,
                data: f(data),
            },
            Self::Error { message, cause } => GitOutcome::Error { message, cause },
            Self::InProgress {
                operation,
                progress,
            } => GitOutcome::InProgress {
                operation,
                progress,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GitError;

    #[test]
    fn test_from_result() {
        let ok: GitOutcome<u32> = GitOutcome::from_result(Ok(3));
        assert!(ok.is_success());
        assert_eq!(ok.data(), Some(&3));

        let err: GitOutcome<u32> = GitOutcome::from_result(Err(GitError::NothingToCommit.into()));
        assert!(err.is_error());
        assert!(err.message().unwrap().contains("Nothing to commit"));
        assert!(matches!(
            err.cause(),
            Some(Error::Git(GitError::NothingToCommit))
        ));
    }

    #[test]
    fn test_map_keeps_state() {
        let outcome = GitOutcome::success_with("done", 2).map(|n| n * 10);
        assert_eq!(outcome.message(), Some("done"));
        assert_eq!(outcome.into_data(), Some(20));

        let busy: GitOutcome<u32> = GitOutcome::InProgress {
            operation: OperationKind::Push,
            progress: None,
        };
        assert!(busy.map(|n| n + 1).is_in_progress());
    }
}
