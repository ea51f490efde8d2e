//! Observable state published by the orchestrator
//!
//! Each piece is a `watch` channel: subscribers always see the latest value
//! and can read it from any thread.

use std::path::PathBuf;

use tokio::sync::watch;

use crate::git::{Branch, ChangedFile, Commit, OperationKind, OperationProgress, RepositoryStatus};

pub struct PublishedState {
    current: watch::Sender<Option<PathBuf>>,
    status: watch::Sender<RepositoryStatus>,
    changed_files: watch::Sender<Vec<ChangedFile>>,
    branches: watch::Sender<Vec<Branch>>,
    commits: watch::Sender<Vec<Commit>>,
    operation: watch::Sender<Option<OperationKind>>,
    progress: watch::Sender<Option<OperationProgress>>,
}

impl PublishedState {
    pub fn new() -> Self {
        Self {
            current: watch::Sender::new(None),
            status: watch::Sender::new(RepositoryStatus::not_a_repository()),
            changed_files: watch::Sender::new(Vec::new()),
            branches: watch::Sender::new(Vec::new()),
            commits: watch::Sender::new(Vec::new()),
            operation: watch::Sender::new(None),
            progress: watch::Sender::new(None),
        }
    }

    // Subscriptions

    pub fn subscribe_current(&self) -> watch::Receiver<Option<PathBuf>> {
        self.current.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<RepositoryStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_changed_files(&self) -> watch::Receiver<Vec<ChangedFile>> {
        self.changed_files.subscribe()
    }

    pub fn subscribe_branches(&self) -> watch::Receiver<Vec<Branch>> {
        self.branches.subscribe()
    }

    pub fn subscribe_commits(&self) -> watch::Receiver<Vec<Commit>> {
        self.commits.subscribe()
    }

    pub fn subscribe_operation(&self) -> watch::Receiver<Option<OperationKind>> {
        self.operation.subscribe()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Option<OperationProgress>> {
        self.progress.subscribe()
    }

    // Snapshots

    pub fn current(&self) -> Option<PathBuf> {
        self.current.borrow().clone()
    }

    pub fn status(&self) -> RepositoryStatus {
        self.status.borrow().clone()
    }

    pub fn progress(&self) -> Option<OperationProgress> {
        self.progress.borrow().clone()
    }

    // Publishing

    pub fn set_current(&self, path: Option<PathBuf>) {
        self.current.send_replace(path);
    }

    pub fn publish_status(&self, status: RepositoryStatus) {
        self.status.send_replace(status);
    }

    pub fn publish_changed_files(&self, files: Vec<ChangedFile>) {
        self.changed_files.send_replace(files);
    }

    pub fn publish_branches(&self, branches: Vec<Branch>) {
        self.branches.send_replace(branches);
    }

    pub fn publish_commits(&self, commits: Vec<Commit>) {
        self.commits.send_replace(commits);
    }

    pub fn publish_operation(&self, operation: Option<OperationKind>) {
        self.operation.send_replace(operation);
    }

    pub fn publish_progress(&self, progress: Option<OperationProgress>) {
        self.progress.send_replace(progress);
    }

    /// Reset repository state to neutral values. The current pointer is left alone.
    pub fn clear_repository_state(&self) {
        self.publish_status(RepositoryStatus::not_a_repository());
        self.publish_changed_files(Vec::new());
        self.publish_branches(Vec::new());
        self.publish_commits(Vec::new());
    }
}

impl Default for PublishedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribers_see_latest_value() {
        let state = PublishedState::new();
        let status = state.subscribe_status();
        assert!(!status.borrow().is_git_repo);

        state.publish_status(RepositoryStatus {
            is_git_repo: true,
            current_branch: "main".to_string(),
            ..Default::default()
        });
        assert_eq!(status.borrow().current_branch, "main");

        state.clear_repository_state();
        assert!(!status.borrow().is_git_repo);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let state = PublishedState::new();
        state.set_current(Some(PathBuf::from("/repo")));
        assert_eq!(state.current(), Some(PathBuf::from("/repo")));
    }
}
