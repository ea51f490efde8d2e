//! Push result and transport error classification
//!
//! A push that returns without error has not necessarily updated anything.
//! Each requested ref gets a [`RefUpdate`] and [`classify_push`] decides
//! whether the push as a whole succeeded.

use std::fmt;

use crate::error::GitError;

/// Outcome of updating one remote ref
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefUpdateStatus {
    Ok,
    UpToDate,
    RejectedNonFastForward,
    RejectedNoDelete,
    RejectedRemoteChanged,
    RejectedOtherReason(String),
    NonExisting,
    NotAttempted,
}

impl RefUpdateStatus {
    /// Map the rejection text libgit2 passes to `push_update_reference`
    pub fn from_rejection(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("non-fast-forward")
            || lower.contains("non-fastforward")
            || lower.contains("fetch first")
            || lower.contains("not a fast forward")
        {
            Self::RejectedNonFastForward
        } else if lower.contains("deletion prohibited")
            || lower.contains("deny deleting")
            || lower.contains("no delete")
        {
            Self::RejectedNoDelete
        } else if lower.contains("stale info") || lower.contains("remote changed") {
            Self::RejectedRemoteChanged
        } else if lower.contains("does not exist") || lower.contains("non-existing") {
            Self::NonExisting
        } else {
            Self::RejectedOtherReason(message.to_string())
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok | Self::UpToDate)
    }
}

impl fmt::Display for RefUpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::UpToDate => write!(f, "up to date"),
            Self::RejectedNonFastForward => write!(f, "rejected (non-fast-forward)"),
            Self::RejectedNoDelete => write!(f, "rejected (deletion not allowed)"),
            Self::RejectedRemoteChanged => write!(f, "rejected (remote changed)"),
            Self::RejectedOtherReason(reason) => write!(f, "rejected ({})", reason),
            Self::NonExisting => write!(f, "remote ref does not exist"),
            Self::NotAttempted => write!(f, "not attempted"),
        }
    }
}

/// Result for one pushed ref
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub remote_ref: String,
    pub status: RefUpdateStatus,
}

impl RefUpdate {
    pub fn new(remote_ref: impl Into<String>, status: RefUpdateStatus) -> Self {
        Self {
            remote_ref: remote_ref.into(),
            status,
        }
    }
}

const AUTH_HINTS: [&str; 7] = [
    "authentication",
    "authorization",
    "permission denied",
    "access denied",
    "invalid username or password",
    "401",
    "403",
];

fn mentions_auth(text: &str) -> bool {
    let lower = text.to_lowercase();
    AUTH_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Decide whether a push succeeded from its per-ref outcomes
///
/// `messages` are the remote's sideband messages, `had_credentials` whether
/// credentials were supplied for the push.
pub fn classify_push(
    updates: &[RefUpdate],
    messages: &[String],
    had_credentials: bool,
) -> Result<(), GitError> {
    if let Some(update) = updates
        .iter()
        .find(|u| u.status == RefUpdateStatus::RejectedNonFastForward)
    {
        return Err(GitError::NonFastForward(update.remote_ref.clone()));
    }

    for update in updates {
        let reason = match &update.status {
            RefUpdateStatus::RejectedNoDelete => {
                "the remote does not allow deleting this branch".to_string()
            }
            RefUpdateStatus::RejectedRemoteChanged => {
                "the remote ref changed while pushing. Fetch and try again.".to_string()
            }
            RefUpdateStatus::RejectedOtherReason(reason) => reason.clone(),
            RefUpdateStatus::NonExisting => "the remote ref does not exist".to_string(),
            RefUpdateStatus::NotAttempted if !had_credentials => {
                return Err(GitError::AuthenticationRequired(format!(
                    "{} was not pushed; authentication may be required",
                    update.remote_ref
                )));
            }
            _ => continue,
        };
        return Err(GitError::RemoteRejected {
            refname: update.remote_ref.clone(),
            reason,
        });
    }

    if !updates.is_empty() && !updates.iter().any(|u| u.status.is_success()) {
        if messages.iter().any(|m| mentions_auth(m)) {
            return Err(GitError::AuthenticationRequired(
                "the remote refused the push credentials".to_string(),
            ));
        }
        let summary = updates
            .iter()
            .map(|u| format!("{} {}", u.remote_ref, u.status))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(GitError::PushIncomplete(summary));
    }

    Ok(())
}

/// Classify a transport-level failure from a fetch, pull, push or clone
///
/// Typed libgit2 codes are checked first. Message matching is a best-effort
/// fallback and can misclassify.
pub fn classify_transport_error(error: &git2::Error) -> GitError {
    let message = error.message().to_string();

    match error.code() {
        git2::ErrorCode::Auth => return GitError::AuthenticationRequired(message),
        git2::ErrorCode::Certificate => return GitError::Transport(message),
        git2::ErrorCode::NotFound if error.class() == git2::ErrorClass::Repository => {
            return GitError::RepositoryNotFound(message);
        }
        git2::ErrorCode::NotFastForward => return GitError::NonFastForward(message),
        git2::ErrorCode::User => return GitError::Cancelled(message),
        _ => {}
    }

    classify_transport_message(&message, is_network_class(error.class()))
}

fn is_network_class(class: git2::ErrorClass) -> bool {
    matches!(
        class,
        git2::ErrorClass::Net
            | git2::ErrorClass::Http
            | git2::ErrorClass::Ssh
            | git2::ErrorClass::Ssl
            | git2::ErrorClass::Callback
    )
}

/// Message-only fallback classification
pub fn classify_transport_message(message: &str, is_network: bool) -> GitError {
    let lower = message.to_lowercase();

    if mentions_auth(&lower) || lower.contains("credentials") || lower.contains("not authorized")
    {
        GitError::AuthenticationRequired(message.to_string())
    } else if lower.contains("not found") || lower.contains("404") || lower.contains("does not exist")
    {
        GitError::RepositoryNotFound(message.to_string())
    } else if lower.contains("timed out") || lower.contains("timeout") {
        GitError::ConnectionTimeout(message.to_string())
    } else if is_network {
        GitError::Transport(message.to_string())
    } else {
        GitError::OperationFailed(message.to_string())
    }
}
