//! Repository orchestrator - registry, current repository and published state
//!
//! Handles are cached by canonical path. Blocking git work runs on tokio's
//! blocking pool behind a semaphore, one operation at a time per handle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{RwLock, Semaphore, watch};
use tracing::{debug, info, instrument, warn};

use super::outcome::GitOutcome;
use super::state::PublishedState;
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::{Error, GitError, Result};
use crate::git::{
    Author, Branch, CancelToken, ChangedFile, CloneOptions, Commit, CommitOptions, FetchOptions,
    FileDiff, MergeOutcome, OperationKind, OperationProgress, ProgressCallback, ProgressReporter,
    PullOptions, PullOutcome, PushOptions, Remote, RepositoryHandle, RepositoryStatus, ResetMode,
    StashEntry,
};

/// A handle shared between the registry and in-flight operations
pub type SharedHandle = Arc<Mutex<RepositoryHandle>>;

/// The network operation currently running
struct ActiveOperation {
    kind: OperationKind,
    cancel: CancelToken,
}

/// Clears the running-operation slot and published progress when dropped
struct OperationGuard<'a> {
    slot: &'a Mutex<Option<ActiveOperation>>,
    state: &'a PublishedState,
    cancel: CancelToken,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        lock_ignoring_poison(self.slot).take();
        self.state.publish_operation(None);
        self.state.publish_progress(None);
    }
}

/// Lifecycle and observable state for many repositories, one of them current
pub struct RepositoryOrchestrator {
    config: Config,
    credentials: Arc<CredentialStore>,
    handles: RwLock<HashMap<PathBuf, SharedHandle>>,
    state: Arc<PublishedState>,
    semaphore: Arc<Semaphore>,
    active: Mutex<Option<ActiveOperation>>,
}

impl RepositoryOrchestrator {
    pub fn new(config: Config, credentials: Arc<CredentialStore>) -> Self {
        let permits = config.max_concurrent_operations.max(1);
        Self {
            config,
            credentials,
            handles: RwLock::new(HashMap::new()),
            state: Arc::new(PublishedState::new()),
            semaphore: Arc::new(Semaphore::new(permits)),
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn current_repository(&self) -> Option<PathBuf> {
        self.state.current()
    }

    /// Number of cached handles
    pub async fn open_repository_count(&self) -> usize {
        self.handles.read().await.len()
    }

    // Subscriptions

    pub fn subscribe_current(&self) -> watch::Receiver<Option<PathBuf>> {
        self.state.subscribe_current()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<RepositoryStatus> {
        self.state.subscribe_status()
    }

    pub fn subscribe_changed_files(&self) -> watch::Receiver<Vec<ChangedFile>> {
        self.state.subscribe_changed_files()
    }

    pub fn subscribe_branches(&self) -> watch::Receiver<Vec<Branch>> {
        self.state.subscribe_branches()
    }

    pub fn subscribe_commits(&self) -> watch::Receiver<Vec<Commit>> {
        self.state.subscribe_commits()
    }

    pub fn subscribe_operation(&self) -> watch::Receiver<Option<OperationKind>> {
        self.state.subscribe_operation()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Option<OperationProgress>> {
        self.state.subscribe_progress()
    }

    // Lifecycle

    /// Open (or reuse) the repository at `dir` and make it current
    ///
    /// A directory that is not a repository yields `Success(false)`; it is not
    /// cached and the published state is reset to neutral values.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub async fn open_repository(&self, dir: impl AsRef<Path>) -> GitOutcome<bool> {
        let path = canonical_path(dir.as_ref());

        if self.handles.read().await.contains_key(&path) {
            debug!("Reusing cached handle");
            self.make_current(path).await;
            return GitOutcome::success_with("Repository opened", true);
        }

        let opening = path.clone();
        let result = self
            .run_blocking(move || {
                let mut handle = RepositoryHandle::new(opening);
                let opened = handle.open()?;
                Ok((opened, handle))
            })
            .await;

        match result {
            Ok((true, handle)) => {
                self.handles
                    .write()
                    .await
                    .insert(path.clone(), Arc::new(Mutex::new(handle)));
                info!("Opened repository {:?}", path);
                self.make_current(path).await;
                GitOutcome::success_with("Repository opened", true)
            }
            Ok((false, _)) => {
                self.state.set_current(None);
                self.state.clear_repository_state();
                GitOutcome::success_with("Not a git repository", false)
            }
            Err(e) => GitOutcome::from_error(e),
        }
    }

    /// Create a new repository at `dir`, replacing any cached handle for it
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub async fn init_repository(&self, dir: impl AsRef<Path>) -> GitOutcome<()> {
        let dir = dir.as_ref().to_path_buf();
        let result = self
            .run_blocking(move || {
                let mut handle = RepositoryHandle::new(&dir);
                handle.init()?;
                Ok((canonical_path(&dir), handle))
            })
            .await;

        match result {
            Ok((path, handle)) => {
                self.replace_handle(path.clone(), handle).await;
                self.make_current(path).await;
                GitOutcome::success_with("Repository initialized", ())
            }
            Err(e) => GitOutcome::from_error(e),
        }
    }

    /// Clone `url` into `dir` and make the clone current
    ///
    /// Credentials come from the credential store entry for the URL's host.
    #[instrument(skip_all, fields(url = %url, dir = %dir.as_ref().display()))]
    pub async fn clone_repository(
        &self,
        url: &str,
        dir: impl AsRef<Path>,
        branch: Option<String>,
        shallow: bool,
        on_progress: Option<ProgressCallback>,
    ) -> GitOutcome<()> {
        let Some(guard) = self.begin_operation(OperationKind::Clone) else {
            return self.busy(OperationKind::Clone);
        };

        let options = CloneOptions {
            url: url.to_string(),
            directory: dir.as_ref().to_path_buf(),
            branch,
            depth: shallow.then_some(1),
            credentials: self.credentials.credentials_for_url(url),
        };
        let reporter = self.reporter(OperationKind::Clone, guard.cancel.clone(), on_progress);

        let result = self
            .run_blocking(move || {
                let mut handle = RepositoryHandle::new(&options.directory);
                handle.clone_repository(&options, &reporter)?;
                Ok((canonical_path(&options.directory), handle))
            })
            .await;
        drop(guard);

        match result {
            Ok((path, handle)) => {
                self.replace_handle(path.clone(), handle).await;
                self.make_current(path).await;
                GitOutcome::success_with("Repository cloned", ())
            }
            Err(e) => GitOutcome::from_error(e),
        }
    }

    /// Release the handle for `dir`; clears published state if it was current
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub async fn close_repository(&self, dir: impl AsRef<Path>) -> GitOutcome<()> {
        let path = canonical_path(dir.as_ref());
        let removed = self.handles.write().await.remove(&path);

        if let Some(handle) = removed {
            self.close_handle(handle).await;
            info!("Closed repository {:?}", path);
        }
        if self.state.current().as_deref() == Some(path.as_path()) {
            self.state.set_current(None);
            self.state.clear_repository_state();
        }
        GitOutcome::success(())
    }

    /// Release every handle and clear all published state
    pub async fn close_all(&self) -> GitOutcome<()> {
        let drained: Vec<SharedHandle> = self.handles.write().await.drain().map(|(_, h)| h).collect();
        let count = drained.len();
        for handle in drained {
            self.close_handle(handle).await;
        }
        debug!("Closed {} repositories", count);
        self.state.set_current(None);
        self.state.clear_repository_state();
        GitOutcome::success(())
    }

    /// Republish status, changed files, branches and recent commits
    ///
    /// Each part is fetched independently; a failing part keeps its previous
    /// value and is logged.
    #[instrument(skip(self))]
    pub async fn refresh_status(&self) -> GitOutcome<RepositoryStatus> {
        let handle = match self.current_handle().await {
            Ok(handle) => handle,
            Err(e) => {
                self.state.clear_repository_state();
                return GitOutcome::from_error(e);
            }
        };

        let limit = self.config.history_limit;
        let state = Arc::clone(&self.state);
        let result = self
            .with_handle(handle, move |handle| {
                let status = log_failure("status", handle.status());
                if let Some(status) = &status {
                    state.publish_status(status.clone());
                }
                if let Some(files) = log_failure("changed files", handle.changed_files()) {
                    state.publish_changed_files(files);
                }
                if let Some(branches) = log_failure("branches", handle.branches()) {
                    state.publish_branches(branches);
                }
                if let Some(commits) = log_failure("history", handle.commit_history(limit)) {
                    state.publish_commits(commits);
                }
                Ok(status)
            })
            .await;

        match result {
            Ok(Some(status)) => GitOutcome::success(status),
            Ok(None) => GitOutcome::success(self.state.status()),
            Err(e) => GitOutcome::from_error(e),
        }
    }

    // Remote operations

    #[instrument(skip(self, options, on_progress), fields(remote = %options.remote))]
    pub async fn push(
        &self,
        mut options: PushOptions,
        on_progress: Option<ProgressCallback>,
    ) -> GitOutcome<()> {
        let Some(guard) = self.begin_operation(OperationKind::Push) else {
            return self.busy(OperationKind::Push);
        };

        let result: Result<()> = async {
            let handle = self.current_handle().await?;
            if options.credentials.is_none() {
                options.credentials = self
                    .remote_credentials(&handle, &options.remote, |r| r.push_url)
                    .await?;
            }
            let reporter = self.reporter(OperationKind::Push, guard.cancel.clone(), on_progress);
            self.with_handle(handle, move |h| h.push(&options, &reporter))
                .await
        }
        .await;
        drop(guard);

        self.refresh_status().await;
        GitOutcome::from_result_with(result, "Pushed successfully")
    }

    #[instrument(skip(self, options, on_progress), fields(remote = %options.remote))]
    pub async fn pull(
        &self,
        mut options: PullOptions,
        on_progress: Option<ProgressCallback>,
    ) -> GitOutcome<PullOutcome> {
        let Some(guard) = self.begin_operation(OperationKind::Pull) else {
            return self.busy(OperationKind::Pull);
        };

        let result: Result<PullOutcome> = async {
            let handle = self.current_handle().await?;
            if options.credentials.is_none() {
                options.credentials = self
                    .remote_credentials(&handle, &options.remote, |r| r.fetch_url)
                    .await?;
            }
            let reporter = self.reporter(OperationKind::Pull, guard.cancel.clone(), on_progress);
            self.with_handle(handle, move |h| h.pull(&options, &reporter))
                .await
        }
        .await;
        drop(guard);

        self.refresh_status().await;
        let message = match &result {
            Ok(PullOutcome::UpToDate) => "Already up to date",
            Ok(PullOutcome::Rebased(_)) => "Pulled and rebased",
            _ => "Pulled successfully",
        };
        GitOutcome::from_result_with(result, message)
    }

    #[instrument(skip(self, options, on_progress), fields(remote = %options.remote))]
    pub async fn fetch(
        &self,
        mut options: FetchOptions,
        on_progress: Option<ProgressCallback>,
    ) -> GitOutcome<()> {
        let Some(guard) = self.begin_operation(OperationKind::Fetch) else {
            return self.busy(OperationKind::Fetch);
        };

        let result: Result<()> = async {
            let handle = self.current_handle().await?;
            if options.credentials.is_none() {
                options.credentials = self
                    .remote_credentials(&handle, &options.remote, |r| r.fetch_url)
                    .await?;
            }
            let reporter = self.reporter(OperationKind::Fetch, guard.cancel.clone(), on_progress);
            self.with_handle(handle, move |h| h.fetch(&options, &reporter))
                .await
        }
        .await;
        drop(guard);

        self.refresh_status().await;
        GitOutcome::from_result_with(result, "Fetched successfully")
    }

    /// Ask the running network operation to stop. Returns whether one was running.
    ///
    /// Cancellation is observed at the next progress tick. Once a push has
    /// started uploading its pack, libgit2 gives no way to abort, so the
    /// push stops at the next server message or runs to completion.
    pub fn cancel_operation(&self) -> bool {
        match lock_ignoring_poison(&self.active).as_ref() {
            Some(active) => {
                info!("Cancelling {}", active.kind);
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    // Working tree and index

    pub async fn status(&self) -> GitOutcome<RepositoryStatus> {
        self.query(|h| h.status()).await
    }

    pub async fn changed_files(&self) -> GitOutcome<Vec<ChangedFile>> {
        self.query(|h| h.changed_files()).await
    }

    pub async fn stage(&self, paths: Vec<String>) -> GitOutcome<()> {
        let message = format!("Staged {} file(s)", paths.len());
        self.mutate(message, move |h| h.stage(&paths)).await
    }

    pub async fn stage_all(&self) -> GitOutcome<()> {
        self.mutate("Staged all changes", |h| h.stage_all()).await
    }

    pub async fn unstage(&self, paths: Vec<String>) -> GitOutcome<()> {
        let message = format!("Unstaged {} file(s)", paths.len());
        self.mutate(message, move |h| h.unstage(&paths)).await
    }

    pub async fn discard_changes(&self, paths: Vec<String>) -> GitOutcome<()> {
        let message = format!("Discarded changes in {} file(s)", paths.len());
        self.mutate(message, move |h| h.discard_changes(&paths))
            .await
    }

    /// Commit staged changes, authored by the stored identity unless overridden
    pub async fn commit(&self, mut options: CommitOptions) -> GitOutcome<Commit> {
        if options.author.is_none() {
            let identity = self.credentials.identity();
            if identity.is_complete() {
                options.author = Some(Author {
                    name: identity.name,
                    email: identity.email,
                });
            }
        }
        let outcome = self.mutate("Committed", move |h| h.commit(&options)).await;
        match outcome {
            GitOutcome::Success { data, .. } => {
                GitOutcome::success_with(format!("Committed {}", data.short_id), data)
            }
            other => other,
        }
    }

    // History and branches

    pub async fn commit_history(&self, max_count: usize) -> GitOutcome<Vec<Commit>> {
        self.query(move |h| h.commit_history(max_count)).await
    }

    pub async fn branches(&self) -> GitOutcome<Vec<Branch>> {
        self.query(|h| h.branches()).await
    }

    pub async fn create_branch(&self, name: &str, checkout: bool) -> GitOutcome<()> {
        let name = name.to_string();
        self.mutate(format!("Created branch {}", name), move |h| {
            h.create_branch(&name, checkout)
        })
        .await
    }

    pub async fn checkout(&self, name: &str) -> GitOutcome<()> {
        let name = name.to_string();
        self.mutate(format!("Switched to {}", name), move |h| h.checkout(&name))
            .await
    }

    pub async fn delete_branch(&self, name: &str, force: bool) -> GitOutcome<()> {
        let name = name.to_string();
        self.mutate(format!("Deleted branch {}", name), move |h| {
            h.delete_branch(&name, force)
        })
        .await
    }

    pub async fn merge(&self, branch: &str) -> GitOutcome<MergeOutcome> {
        let branch = branch.to_string();
        self.mutate(format!("Merged {}", branch), move |h| h.merge(&branch))
            .await
    }

    // Remotes

    pub async fn remotes(&self) -> GitOutcome<Vec<Remote>> {
        self.query(|h| h.remotes()).await
    }

    pub async fn add_remote(&self, name: &str, url: &str) -> GitOutcome<()> {
        let (name, url) = (name.to_string(), url.to_string());
        self.mutate(format!("Added remote {}", name), move |h| {
            h.add_remote(&name, &url)
        })
        .await
    }

    pub async fn remove_remote(&self, name: &str) -> GitOutcome<()> {
        let name = name.to_string();
        self.mutate(format!("Removed remote {}", name), move |h| {
            h.remove_remote(&name)
        })
        .await
    }

    // Diff, reset and stash

    pub async fn file_diff(&self, path: &str, staged: bool) -> GitOutcome<FileDiff> {
        let path = path.to_string();
        self.query(move |h| h.file_diff(&path, staged)).await
    }

    pub async fn reset(&self, commit_id: &str, mode: ResetMode) -> GitOutcome<()> {
        let commit_id = commit_id.to_string();
        self.mutate(format!("Reset to {}", commit_id), move |h| {
            h.reset(&commit_id, mode)
        })
        .await
    }

    pub async fn stash(&self, message: Option<String>) -> GitOutcome<String> {
        self.mutate("Changes stashed", move |h| h.stash(message.as_deref()))
            .await
    }

    pub async fn stash_apply(&self, reference: Option<String>, drop: bool) -> GitOutcome<()> {
        self.mutate("Stash applied", move |h| {
            h.stash_apply(reference.as_deref(), drop)
        })
        .await
    }

    pub async fn stash_list(&self) -> GitOutcome<Vec<StashEntry>> {
        self.query(|h| h.stash_list()).await
    }

    // Internals

    async fn make_current(&self, path: PathBuf) {
        self.state.set_current(Some(path));
        self.refresh_status().await;
    }

    async fn replace_handle(&self, path: PathBuf, handle: RepositoryHandle) {
        let previous = self
            .handles
            .write()
            .await
            .insert(path, Arc::new(Mutex::new(handle)));
        if let Some(previous) = previous {
            self.close_handle(previous).await;
        }
    }

    /// Close on the blocking pool; a busy handle is released once its operation ends
    async fn close_handle(&self, handle: SharedHandle) {
        let closed = self
            .run_blocking(move || {
                lock_ignoring_poison(&handle).close();
                Ok(())
            })
            .await;
        if let Err(e) = closed {
            warn!("Failed to close repository handle: {}", e);
        }
    }

    async fn current_handle(&self) -> Result<SharedHandle> {
        let path = self
            .state
            .current()
            .ok_or(GitError::NoCurrentRepository)?;
        self.handles
            .read()
            .await
            .get(&path)
            .cloned()
            .ok_or_else(|| GitError::NoCurrentRepository.into())
    }

    /// Credentials for the URL of `remote`, `None` if the remote has no usable URL
    async fn remote_credentials(
        &self,
        handle: &SharedHandle,
        remote: &str,
        url_of: fn(Remote) -> String,
    ) -> Result<Option<crate::credentials::Credentials>> {
        let name = remote.to_string();
        let remote = self
            .with_handle(Arc::clone(handle), move |h| {
                h.remotes()?
                    .into_iter()
                    .find(|r| r.name == name)
                    .ok_or_else(|| Error::from(GitError::RemoteNotFound(name)))
            })
            .await?;

        let url = url_of(remote);
        if url.is_empty() {
            return Ok(None);
        }
        Ok(self.credentials.credentials_for_url(&url))
    }

    async fn query<T, F>(&self, f: F) -> GitOutcome<T>
    where
        F: FnOnce(&mut RepositoryHandle) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let result = match self.current_handle().await {
            Ok(handle) => self.with_handle(handle, f).await,
            Err(e) => Err(e),
        };
        GitOutcome::from_result(result)
    }

    /// Run a state-changing operation, then republish on success
    async fn mutate<T, F>(&self, message: impl Into<String>, f: F) -> GitOutcome<T>
    where
        F: FnOnce(&mut RepositoryHandle) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let result = match self.current_handle().await {
            Ok(handle) => self.with_handle(handle, f).await,
            Err(e) => Err(e),
        };
        if result.is_ok() {
            self.refresh_status().await;
        }
        GitOutcome::from_result_with(result, message)
    }

    /// Run `f` with exclusive access to one handle on the blocking pool
    async fn with_handle<T, F>(&self, handle: SharedHandle, f: F) -> Result<T>
    where
        F: FnOnce(&mut RepositoryHandle) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_blocking(move || {
            let mut guard = lock_ignoring_poison(&handle);
            f(&mut guard)
        })
        .await
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| GitError::OperationFailed("operation pool is closed".to_string()))?;

        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| GitError::OperationFailed(format!("background task failed: {}", e)))?
    }

    fn begin_operation(&self, kind: OperationKind) -> Option<OperationGuard<'_>> {
        let mut slot = lock_ignoring_poison(&self.active);
        if let Some(active) = slot.as_ref() {
            debug!("{} requested while {} is running", kind, active.kind);
            return None;
        }

        let cancel = CancelToken::new();
        *slot = Some(ActiveOperation {
            kind,
            cancel: cancel.clone(),
        });
        drop(slot);

        self.state.publish_operation(Some(kind));
        Some(OperationGuard {
            slot: &self.active,
            state: self.state.as_ref(),
            cancel,
        })
    }

    fn busy<T>(&self, requested: OperationKind) -> GitOutcome<T> {
        let operation = lock_ignoring_poison(&self.active)
            .as_ref()
            .map(|active| active.kind)
            .unwrap_or(requested);
        GitOutcome::InProgress {
            operation,
            progress: self.state.progress(),
        }
    }

    /// Reporter that publishes progress and forwards it to the caller's callback
    fn reporter(
        &self,
        kind: OperationKind,
        cancel: CancelToken,
        on_progress: Option<ProgressCallback>,
    ) -> ProgressReporter {
        let state = Arc::clone(&self.state);
        ProgressReporter::new(kind)
            .with_cancel(cancel)
            .with_callback(Arc::new(move |progress: OperationProgress| {
                state.publish_progress(Some(progress.clone()));
                if let Some(callback) = &on_progress {
                    callback(progress);
                }
            }))
    }
}

fn canonical_path(dir: &Path) -> PathBuf {
    std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf())
}

/// A panic inside one git operation must not wedge the handle for good
fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn log_failure<T>(part: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to refresh {}: {}", part, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreferenceStore;
    use crate::credentials::EphemeralKeyVault;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn orchestrator() -> RepositoryOrchestrator {
        let store = CredentialStore::new(
            PreferenceStore::in_memory(),
            Arc::new(EphemeralKeyVault::new()),
        );
        RepositoryOrchestrator::new(Config::default(), Arc::new(store))
    }

    #[tokio::test]
    async fn test_second_remote_operation_reports_in_progress() {
        let orchestrator = orchestrator();
        let guard = orchestrator.begin_operation(OperationKind::Push).unwrap();
        assert_eq!(
            *orchestrator.subscribe_operation().borrow(),
            Some(OperationKind::Push)
        );

        let outcome = orchestrator.fetch(FetchOptions::default(), None).await;
        assert!(matches!(
            outcome,
            GitOutcome::InProgress {
                operation: OperationKind::Push,
                ..
            }
        ));

        assert!(orchestrator.cancel_operation());
        assert!(guard.cancel.is_cancelled());
        drop(guard);
        assert_eq!(*orchestrator.subscribe_operation().borrow(), None);
        assert!(!orchestrator.cancel_operation());
    }

    #[tokio::test]
    async fn test_guard_clears_state_after_failure() {
        let orchestrator = orchestrator();
        // No current repository: the push fails but must still clear its flags
        let outcome = orchestrator.push(PushOptions::default(), None).await;
        assert!(matches!(
            outcome.cause(),
            Some(Error::Git(GitError::NoCurrentRepository))
        ));
        assert_eq!(*orchestrator.subscribe_operation().borrow(), None);
        assert_eq!(*orchestrator.subscribe_progress().borrow(), None);
    }

    #[tokio::test]
    async fn test_open_caches_by_canonical_path() {
        let temp = TempDir::new().unwrap();
        git2::Repository::init(temp.path()).unwrap();
        let orchestrator = orchestrator();

        assert_eq!(orchestrator.open_repository(temp.path()).await.into_data(), Some(true));
        let dotted = temp.path().join(".");
        assert_eq!(orchestrator.open_repository(&dotted).await.into_data(), Some(true));
        assert_eq!(orchestrator.open_repository_count().await, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_close_does_not_block_runtime_while_handle_is_busy() {
        let temp = TempDir::new().unwrap();
        git2::Repository::init(temp.path()).unwrap();
        let orchestrator = Arc::new(orchestrator());
        orchestrator.open_repository(temp.path()).await;
        let handle = orchestrator.current_handle().await.unwrap();

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let busy = {
            let orchestrator = Arc::clone(&orchestrator);
            let handle = Arc::clone(&handle);
            tokio::spawn(async move {
                orchestrator
                    .with_handle(handle, move |_| {
                        let _ = started_tx.send(());
                        std::thread::sleep(Duration::from_millis(1000));
                        Ok(())
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let closing = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.close_all().await })
        };

        // Timers keep firing on the single runtime thread while close waits
        let start = Instant::now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(start.elapsed() < Duration::from_millis(600));

        assert!(closing.await.unwrap().is_success());
        assert!(busy.await.unwrap().is_ok());
        assert!(!lock_ignoring_poison(&handle).is_open());
        assert_eq!(orchestrator.current_repository(), None);
    }
}
