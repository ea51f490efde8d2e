//! Repository handle backed by libgit2
//!
//! One [`RepositoryHandle`] owns one working directory. Methods are blocking;
//! the orchestrator runs them on the blocking pool and serializes access per
//! handle.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    AnnotatedCommit, BranchType, Cred, CredentialType, DiffFormat, DiffOptions, ErrorCode,
    IndexAddOption, ObjectType, RemoteCallbacks, Repository, Signature, Sort, StashApplyOptions,
    Status, StatusOptions,
};
use tracing::{debug, info, instrument, warn};

use super::diff::parse_hunks;
use super::lock::{RetryPolicy, clear_stale_locks};
use super::progress::ProgressReporter;
use super::push::{RefUpdate, RefUpdateStatus, classify_push, classify_transport_error};
use super::types::{
    Author, Branch, ChangedFile, CloneOptions, Commit, CommitOptions, FetchOptions, FileDiff,
    FileStatus, MergeOutcome, PullOptions, PullOutcome, PushOptions, Remote, RepositoryStatus,
    ResetMode, SHORT_ID_LEN, StashEntry,
};
use crate::credentials::Credentials;
use crate::error::{Error, GitError, Result};

/// Signature used when neither an override nor git config provides one
const FALLBACK_NAME: &str = "Unknown";
const FALLBACK_EMAIL: &str = "unknown@localhost";

/// Credential callback invocations before giving up on a remote
const MAX_AUTH_ATTEMPTS: u32 = 3;

const STAGED_FLAGS: Status = Status::INDEX_NEW
    .union(Status::INDEX_MODIFIED)
    .union(Status::INDEX_DELETED)
    .union(Status::INDEX_RENAMED)
    .union(Status::INDEX_TYPECHANGE);

const UNSTAGED_FLAGS: Status = Status::WT_MODIFIED
    .union(Status::WT_DELETED)
    .union(Status::WT_RENAMED)
    .union(Status::WT_TYPECHANGE);

/// Lifecycle of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Unopened,
    NotARepository,
    Opened,
    Initialized,
    Cloned,
    Closed,
}

/// All git operations on one working directory
pub struct RepositoryHandle {
    path: PathBuf,
    repo: Option<Repository>,
    state: HandleState,
}

impl RepositoryHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            repo: None,
            state: HandleState::Unopened,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.repo.is_some()
    }

    // Lifecycle

    /// Open the repository at the handle's path
    ///
    /// Returns `Ok(false)` when the directory has no `.git` entry.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn open(&mut self) -> Result<bool> {
        self.ensure_not_closed()?;
        if !self.path.join(".git").exists() {
            debug!("No .git entry, not a repository");
            self.state = HandleState::NotARepository;
            return Ok(false);
        }

        let repo = Repository::open(&self.path)?;
        self.repo = Some(repo);
        self.state = HandleState::Opened;
        debug!("Opened repository");
        Ok(true)
    }

    /// Create a new repository at the handle's path
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn init(&mut self) -> Result<()> {
        self.ensure_not_closed()?;
        std::fs::create_dir_all(&self.path)?;
        let repo = Repository::init(&self.path)?;
        self.repo = Some(repo);
        self.state = HandleState::Initialized;
        info!("Initialized repository");
        Ok(())
    }

    /// Clone `options.url` into `options.directory`, which becomes the handle's path
    #[instrument(skip_all, fields(url = %options.url, directory = %options.directory.display()))]
    pub fn clone_repository(
        &mut self,
        options: &CloneOptions,
        progress: &ProgressReporter,
    ) -> Result<()> {
        self.ensure_not_closed()?;
        check_cancelled(progress)?;

        let attempts = Cell::new(0);
        let mut fetch_options = git2::FetchOptions::new();
        fetch_options.remote_callbacks(remote_callbacks(
            options.credentials.as_ref(),
            progress,
            &attempts,
        ));
        if let Some(depth) = options.depth {
            fetch_options.depth(i32::try_from(depth).unwrap_or(i32::MAX));
        }

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_options);
        if let Some(branch) = &options.branch {
            builder.branch(branch);
        }

        let repo = builder
            .clone(&options.url, &options.directory)
            .map_err(|e| remote_failure(e, progress))?;

        progress.report(1, 1, "Clone complete");
        info!("Cloned repository");

        self.path = options.directory.clone();
        self.repo = Some(repo);
        self.state = HandleState::Cloned;
        Ok(())
    }

    /// Release the underlying repository. Idempotent.
    pub fn close(&mut self) {
        if self.repo.take().is_some() {
            debug!("Closed repository at {:?}", self.path);
        }
        self.state = HandleState::Closed;
    }

    // Working state

    pub fn status(&self) -> Result<RepositoryStatus> {
        let repo = self.repo()?;

        let remote_names = remote_names(repo)?;
        let preferred = remote_names
            .iter()
            .find(|name| name.as_str() == super::types::DEFAULT_REMOTE)
            .or_else(|| remote_names.first());
        let remote_url = preferred
            .and_then(|name| repo.find_remote(name).ok())
            .and_then(|remote| remote.url().map(str::to_string));

        let statuses = repo.statuses(Some(&mut status_options()))?;
        let mut has_staged = false;
        let mut has_unstaged = false;
        for entry in statuses.iter() {
            let status = entry.status();
            has_staged |= status.intersects(STAGED_FLAGS);
            has_unstaged |=
                status.intersects(UNSTAGED_FLAGS | Status::WT_NEW | Status::CONFLICTED);
        }

        let (ahead_count, behind_count) = head_tracking_counts(repo).unwrap_or_else(|e| {
            debug!("Ahead/behind unavailable: {}", e);
            (0, 0)
        });

        Ok(RepositoryStatus {
            is_git_repo: true,
            current_branch: display_branch(repo),
            has_remote: !remote_names.is_empty(),
            remote_url,
            is_clean: !has_staged && !has_unstaged,
            has_unstaged_changes: has_unstaged,
            has_staged_changes: has_staged,
            ahead_count,
            behind_count,
        })
    }

    /// Staged changes, then unstaged tracked changes, untracked files and conflicts
    pub fn changed_files(&self) -> Result<Vec<ChangedFile>> {
        let repo = self.repo()?;
        let statuses = repo.statuses(Some(&mut status_options()))?;

        let mut seen = HashSet::new();
        let mut staged = Vec::new();
        let mut unstaged = Vec::new();
        let mut untracked = Vec::new();
        let mut conflicting = Vec::new();

        for entry in statuses.iter() {
            let status = entry.status();
            let fallback = entry.path().unwrap_or_default().to_string();

            if status.contains(Status::CONFLICTED) {
                if seen.insert((fallback.clone(), false)) {
                    conflicting.push(changed(fallback, FileStatus::Conflicting, false));
                }
                continue;
            }

            if let Some(file_status) = index_status(status) {
                let path = entry
                    .head_to_index()
                    .and_then(|d| d.new_file().path().map(lossy_path))
                    .unwrap_or_else(|| fallback.clone());
                if seen.insert((path.clone(), true)) {
                    staged.push(changed(path, file_status, true));
                }
            }

            if status.contains(Status::WT_NEW) {
                if seen.insert((fallback.clone(), false)) {
                    untracked.push(changed(fallback, FileStatus::Untracked, false));
                }
            } else if let Some(file_status) = worktree_status(status) {
                let path = entry
                    .index_to_workdir()
                    .and_then(|d| d.new_file().path().map(lossy_path))
                    .unwrap_or(fallback);
                if seen.insert((path.clone(), false)) {
                    unstaged.push(changed(path, file_status, false));
                }
            }
        }

        staged.extend(unstaged);
        staged.extend(untracked);
        staged.extend(conflicting);
        Ok(staged)
    }

    // Index and commits

    /// Stage paths; paths missing from the working tree are staged as deletions
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn stage(&self, paths: &[String]) -> Result<()> {
        let workdir = self.workdir()?;
        self.with_lock_recovery("stage", |repo| {
            let mut index = repo.index()?;
            for path in paths {
                let relative = Path::new(path);
                let full = workdir.join(relative);
                if full.is_dir() {
                    index.add_all([path.as_str()], IndexAddOption::DEFAULT, None)?;
                } else if full.exists() {
                    index.add_path(relative)?;
                } else {
                    // Prefix match so a deleted directory drops every entry under it
                    index.remove_all([path.as_str()], None)?;
                }
            }
            index.write()?;
            Ok(())
        })
    }

    /// Stage every change including deletions
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn stage_all(&self) -> Result<()> {
        self.with_lock_recovery("stage all", |repo| {
            let mut index = repo.index()?;
            index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
            index.update_all(["*"], None)?;
            index.write()?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn unstage(&self, paths: &[String]) -> Result<()> {
        self.with_lock_recovery("unstage", |repo| {
            match repo.head().and_then(|head| head.peel_to_commit()) {
                Ok(commit) => {
                    repo.reset_default(Some(commit.as_object()), paths.iter().map(String::as_str))?;
                }
                Err(_) => {
                    // Nothing committed yet: unstaging means dropping the index entry
                    let mut index = repo.index()?;
                    for path in paths {
                        index.remove_path(Path::new(path))?;
                    }
                    index.write()?;
                }
            }
            Ok(())
        })
    }

    /// Restore tracked paths from the index and delete untracked ones
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn discard_changes(&self, paths: &[String]) -> Result<()> {
        let workdir = self.workdir()?;
        self.with_lock_recovery("discard", |repo| {
            let index = repo.index()?;
            let mut tracked = Vec::new();
            for path in paths {
                if index.get_path(Path::new(path), 0).is_some() {
                    tracked.push(path.as_str());
                    continue;
                }
                let full = workdir.join(path);
                if full.is_dir() {
                    std::fs::remove_dir_all(&full)?;
                } else if full.exists() {
                    std::fs::remove_file(&full)?;
                }
            }

            if !tracked.is_empty() {
                let mut checkout = CheckoutBuilder::new();
                checkout.force();
                for path in &tracked {
                    checkout.path(*path);
                }
                repo.checkout_index(None, Some(&mut checkout))?;
            }
            Ok(())
        })
    }

    #[instrument(skip_all, fields(path = %self.path.display(), amend = options.amend))]
    pub fn commit(&self, options: &CommitOptions) -> Result<Commit> {
        if options.message.trim().is_empty() {
            return Err(GitError::EmptyCommitMessage.into());
        }

        let commit = self.with_lock_recovery("commit", |repo| {
            let mut index = repo.index()?;
            let tree_id = index.write_tree()?;
            let tree = repo.find_tree(tree_id)?;
            let parent = head_commit(repo)?;

            let author = signature(repo, options.author.as_ref())?;
            let committer = match &options.author {
                Some(_) => repo.signature().unwrap_or_else(|_| author.to_owned()),
                None => author.to_owned(),
            };

            let oid = if options.amend {
                let head = parent.ok_or_else(|| {
                    GitError::InvalidRef("Nothing to amend: the branch has no commits".to_string())
                })?;
                head.amend(
                    Some("HEAD"),
                    Some(&author),
                    Some(&committer),
                    None,
                    Some(&options.message),
                    Some(&tree),
                )?
            } else {
                if !options.allow_empty {
                    let unchanged = match &parent {
                        Some(parent) => parent.tree_id() == tree_id,
                        None => index.is_empty(),
                    };
                    if unchanged {
                        return Err(GitError::NothingToCommit.into());
                    }
                }
                let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
                repo.commit(
                    Some("HEAD"),
                    &author,
                    &committer,
                    &options.message,
                    &tree,
                    &parents,
                )?
            };

            Ok(Commit::from_git(&repo.find_commit(oid)?))
        })?;

        info!("Created commit {}", commit.short_id);
        Ok(commit)
    }

    // Remote operations

    #[instrument(skip_all, fields(path = %self.path.display(), remote = %options.remote))]
    pub fn push(&self, options: &PushOptions, progress: &ProgressReporter) -> Result<()> {
        let repo = self.repo()?;
        check_cancelled(progress)?;

        let branch = match &options.branch {
            Some(branch) => branch.clone(),
            None => current_branch_name(repo)?,
        };
        let local_ref = format!("refs/heads/{}", branch);
        let local_oid = repo
            .refname_to_id(&local_ref)
            .map_err(|_| GitError::BranchNotFound(branch.clone()))?;
        let tracking_ref = format!("refs/remotes/{}/{}", options.remote, branch);
        let already_pushed = repo.refname_to_id(&tracking_ref).ok() == Some(local_oid);

        let mut remote = repo
            .find_remote(&options.remote)
            .map_err(|_| GitError::RemoteNotFound(options.remote.clone()))?;
        let refspec = format!(
            "{}{}:{}",
            if options.force { "+" } else { "" },
            local_ref,
            local_ref
        );

        let reported: RefCell<Vec<RefUpdate>> = RefCell::new(Vec::new());
        let unchanged: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
        let messages: RefCell<Vec<String>> = RefCell::new(Vec::new());
        let attempts = Cell::new(0);
        {
            let mut callbacks =
                remote_callbacks(options.credentials.as_ref(), progress, &attempts);
            callbacks.push_negotiation(|updates| {
                abort_if_cancelled(progress)?;
                for update in updates {
                    if update.src() == update.dst() {
                        if let Some(name) = update.dst_refname() {
                            unchanged.borrow_mut().insert(name.to_string());
                        }
                    }
                }
                Ok(())
            });
            callbacks.push_update_reference(|refname, rejection| {
                let status = match rejection {
                    None => RefUpdateStatus::Ok,
                    Some(message) => RefUpdateStatus::from_rejection(message),
                };
                reported.borrow_mut().push(RefUpdate::new(refname, status));
                Ok(())
            });
            callbacks.sideband_progress(|data| {
                let text = String::from_utf8_lossy(data).trim().to_string();
                if text.is_empty() {
                    return !progress.is_cancelled();
                }
                messages.borrow_mut().push(text.clone());
                progress.report(0, 0, text)
            });
            callbacks.push_transfer_progress(|current, total, bytes| {
                progress.report(
                    current,
                    total,
                    format!("Writing objects {}/{} ({} KiB)", current, total, bytes / 1024),
                );
            });

            let mut push_options = git2::PushOptions::new();
            push_options.remote_callbacks(callbacks);
            remote
                .push(&[refspec.as_str()], Some(&mut push_options))
                .map_err(|e| remote_failure(e, progress))?;
        }

        let mut updates = reported.into_inner();
        if !updates.iter().any(|u| u.remote_ref == local_ref) {
            let status = if unchanged.borrow().contains(&local_ref) || already_pushed {
                RefUpdateStatus::UpToDate
            } else {
                RefUpdateStatus::NotAttempted
            };
            updates.push(RefUpdate::new(local_ref.as_str(), status));
        }
        for update in &updates {
            debug!("{} {}", update.remote_ref, update.status);
        }
        classify_push(
            &updates,
            &messages.into_inner(),
            options.credentials.is_some(),
        )?;

        if options.set_upstream {
            set_upstream_if_missing(repo, &branch, &options.remote);
        }
        progress.report(1, 1, "Push complete");
        info!("Pushed {}", branch);
        Ok(())
    }

    #[instrument(skip_all, fields(path = %self.path.display(), remote = %options.remote))]
    pub fn fetch(&self, options: &FetchOptions, progress: &ProgressReporter) -> Result<()> {
        let repo = self.repo()?;
        fetch_remote(
            repo,
            &options.remote,
            options.credentials.as_ref(),
            options.prune,
            progress,
        )?;
        progress.report(1, 1, "Fetch complete");
        Ok(())
    }

    /// Fetch, then fast-forward, merge or rebase the current branch
    #[instrument(skip_all, fields(path = %self.path.display(), remote = %options.remote, rebase = options.rebase))]
    pub fn pull(&self, options: &PullOptions, progress: &ProgressReporter) -> Result<PullOutcome> {
        let repo = self.repo()?;
        let branch = current_branch_name(repo)?;

        fetch_remote(
            repo,
            &options.remote,
            options.credentials.as_ref(),
            false,
            progress,
        )?;

        let upstream_ref = match &options.branch {
            Some(remote_branch) => format!("refs/remotes/{}/{}", options.remote, remote_branch),
            None => repo
                .find_branch(&branch, BranchType::Local)
                .ok()
                .and_then(|b| b.upstream().ok())
                .and_then(|u| u.get().name().map(str::to_string))
                .unwrap_or_else(|| format!("refs/remotes/{}/{}", options.remote, branch)),
        };
        let upstream = repo
            .find_reference(&upstream_ref)
            .map_err(|_| GitError::BranchNotFound(upstream_ref.clone()))?;
        let annotated = repo.reference_to_annotated_commit(&upstream)?;
        let label = upstream_ref
            .strip_prefix("refs/remotes/")
            .unwrap_or(&upstream_ref)
            .to_string();

        let outcome = if options.rebase {
            rebase_onto(repo, &annotated)?
        } else {
            match integrate(repo, &annotated, &label)? {
                MergeOutcome::UpToDate => PullOutcome::UpToDate,
                MergeOutcome::FastForward => PullOutcome::FastForward,
                MergeOutcome::Merged(id) => PullOutcome::Merged(id),
            }
        };

        progress.report(1, 1, "Pull complete");
        info!("Pulled {}: {:?}", label, outcome);
        Ok(outcome)
    }

    // History and branches

    /// Up to `max_count` commits reachable from HEAD, newest first
    pub fn commit_history(&self, max_count: usize) -> Result<Vec<Commit>> {
        let repo = self.repo()?;
        let mut revwalk = repo.revwalk()?;
        match revwalk.push_head() {
            Ok(()) => {}
            Err(e) if is_unborn(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }
        revwalk.set_sorting(Sort::TIME)?;

        revwalk
            .take(max_count)
            .map(|oid| Ok(Commit::from_git(&repo.find_commit(oid?)?)))
            .collect()
    }

    /// Local branches first, then remote-tracking branches
    pub fn branches(&self) -> Result<Vec<Branch>> {
        let repo = self.repo()?;
        let mut branches = Vec::new();

        for entry in repo.branches(None)? {
            let (branch, kind) = entry?;
            let Some(name) = branch.name()?.map(str::to_string) else {
                continue;
            };
            let last_commit_id = branch.get().target().map(|oid| oid.to_string());

            match kind {
                BranchType::Local => {
                    let tracking_branch = branch
                        .upstream()
                        .ok()
                        .and_then(|u| u.name().ok().flatten().map(str::to_string));
                    let (ahead_count, behind_count) =
                        branch_tracking_counts(repo, &branch).unwrap_or_else(|e| {
                            debug!("Ahead/behind unavailable for {}: {}", name, e);
                            (0, 0)
                        });
                    branches.push(Branch {
                        is_local: true,
                        is_current: branch.is_head(),
                        tracking_branch,
                        last_commit_id,
                        ahead_count,
                        behind_count,
                        name,
                        ..Default::default()
                    });
                }
                BranchType::Remote => {
                    if name.ends_with("/HEAD") {
                        continue;
                    }
                    branches.push(Branch {
                        name,
                        is_remote: true,
                        last_commit_id,
                        ..Default::default()
                    });
                }
            }
        }

        branches.sort_by(|a, b| b.is_local.cmp(&a.is_local).then_with(|| a.name.cmp(&b.name)));
        Ok(branches)
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn create_branch(&self, name: &str, checkout: bool) -> Result<()> {
        {
            let repo = self.repo()?;
            let head = repo.head().and_then(|h| h.peel_to_commit()).map_err(|_| {
                GitError::InvalidRef("Cannot create a branch before the first commit".to_string())
            })?;
            repo.branch(name, &head, false)?;
            info!("Created branch {}", name);
        }
        if checkout {
            self.checkout(name)?;
        }
        Ok(())
    }

    /// Switch to a local branch, creating a tracking branch from a remote one if needed
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn checkout(&self, name: &str) -> Result<()> {
        let repo = self.repo()?;

        let branch = match repo.find_branch(name, BranchType::Local) {
            Ok(branch) => branch,
            Err(_) => {
                let remote_branch = repo
                    .find_branch(name, BranchType::Remote)
                    .or_else(|_| {
                        repo.find_branch(
                            &format!("{}/{}", super::types::DEFAULT_REMOTE, name),
                            BranchType::Remote,
                        )
                    })
                    .map_err(|_| GitError::BranchNotFound(name.to_string()))?;
                let remote_name = remote_branch
                    .name()?
                    .map(str::to_string)
                    .ok_or_else(|| GitError::InvalidRef(name.to_string()))?;
                let local_name = remote_name
                    .split_once('/')
                    .map(|(_, rest)| rest.to_string())
                    .unwrap_or_else(|| name.to_string());

                match repo.find_branch(&local_name, BranchType::Local) {
                    Ok(existing) => existing,
                    Err(_) => {
                        let commit = remote_branch.get().peel_to_commit()?;
                        let mut local = repo.branch(&local_name, &commit, false)?;
                        local.set_upstream(Some(&remote_name))?;
                        debug!("Created {} tracking {}", local_name, remote_name);
                        local
                    }
                }
            }
        };

        let refname = branch
            .get()
            .name()
            .ok_or_else(|| GitError::InvalidRef(name.to_string()))?
            .to_string();
        let target = branch.get().peel(ObjectType::Commit)?;
        repo.checkout_tree(&target, Some(CheckoutBuilder::new().safe()))?;
        repo.set_head(&refname)?;
        info!("Checked out {}", refname);
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn delete_branch(&self, name: &str, force: bool) -> Result<()> {
        let repo = self.repo()?;
        let mut branch = repo
            .find_branch(name, BranchType::Local)
            .map_err(|_| GitError::BranchNotFound(name.to_string()))?;
        if branch.is_head() {
            return Err(GitError::BranchCheckedOut(name.to_string()).into());
        }

        if !force {
            let tip = branch.get().target();
            let head = repo.head().ok().and_then(|h| h.target());
            if let (Some(tip), Some(head)) = (tip, head) {
                if tip != head && !repo.graph_descendant_of(head, tip)? {
                    return Err(GitError::BranchNotMerged(name.to_string()).into());
                }
            }
        }

        branch.delete()?;
        info!("Deleted branch {}", name);
        Ok(())
    }

    /// Merge a branch (local or remote-tracking) into HEAD
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn merge(&self, branch: &str) -> Result<MergeOutcome> {
        let repo = self.repo()?;
        let reference = repo
            .resolve_reference_from_short_name(branch)
            .map_err(|_| GitError::BranchNotFound(branch.to_string()))?;
        let annotated = repo.reference_to_annotated_commit(&reference)?;
        integrate(repo, &annotated, branch)
    }

    // Remotes

    pub fn remotes(&self) -> Result<Vec<Remote>> {
        let repo = self.repo()?;
        remote_names(repo)?
            .into_iter()
            .map(|name| {
                let remote = repo.find_remote(&name)?;
                let fetch_url = remote.url().unwrap_or_default().to_string();
                let push_url = remote
                    .pushurl()
                    .map(str::to_string)
                    .unwrap_or_else(|| fetch_url.clone());
                Ok(Remote {
                    name,
                    fetch_url,
                    push_url,
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.repo()?.remote(name, url)?;
        info!("Added remote {}", name);
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn remove_remote(&self, name: &str) -> Result<()> {
        self.repo()?.remote_delete(name).map_err(|e| match e.code() {
            ErrorCode::NotFound => Error::from(GitError::RemoteNotFound(name.to_string())),
            _ => e.into(),
        })?;
        info!("Removed remote {}", name);
        Ok(())
    }

    // Diffs

    /// Diff of one file against HEAD: the index when `staged`, the working tree otherwise
    pub fn file_diff(&self, path: &str, staged: bool) -> Result<FileDiff> {
        let repo = self.repo()?;
        let head_tree = match repo.head() {
            Ok(head) => Some(head.peel_to_tree()?),
            Err(e) if is_unborn(&e) => None,
            Err(e) => return Err(e.into()),
        };

        let mut options = DiffOptions::new();
        options
            .pathspec(path)
            .disable_pathspec_match(true)
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .show_untracked_content(true);

        let diff = if staged {
            repo.diff_tree_to_index(head_tree.as_ref(), None, Some(&mut options))?
        } else {
            repo.diff_tree_to_workdir(head_tree.as_ref(), Some(&mut options))?
        };

        let Some(delta) = diff.deltas().next() else {
            return Ok(FileDiff::unchanged(path));
        };
        let status = FileStatus::from(delta.status());
        let new_path = delta.new_file().path().map(lossy_path);
        let old_path = delta.old_file().path().map(lossy_path);

        let mut text = String::new();
        let mut is_binary = false;
        diff.print(DiffFormat::Patch, |delta, _hunk, line| {
            if delta.flags().is_binary() {
                is_binary = true;
            }
            match line.origin() {
                origin @ ('+' | '-' | ' ') => text.push(origin),
                'B' => is_binary = true,
                _ => {}
            }
            text.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;

        let path = new_path.clone().unwrap_or_else(|| path.to_string());
        Ok(FileDiff {
            old_path: old_path.filter(|old| *old != path),
            path,
            status,
            hunks: parse_hunks(&text),
            is_binary,
        })
    }

    // Reset and stash

    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn reset(&self, commit_id: &str, mode: ResetMode) -> Result<()> {
        let repo = self.repo()?;
        let target = repo
            .revparse_single(commit_id)
            .map_err(|_| GitError::InvalidRef(commit_id.to_string()))?
            .peel(ObjectType::Commit)?;
        repo.reset(&target, mode.into(), None)?;
        info!("Reset ({:?}) to {}", mode, commit_id);
        Ok(())
    }

    /// Stash working changes. Returns the stash commit id.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn stash(&mut self, message: Option<&str>) -> Result<String> {
        let repo = self.repo_mut()?;
        let stasher = signature(repo, None)?;
        let message = match message {
            Some(message) => message.to_string(),
            None => format!("WIP on {}", display_branch(repo)),
        };

        let oid = repo
            .stash_save(&stasher, &message, None)
            .map_err(|e| match e.code() {
                ErrorCode::NotFound => Error::from(GitError::NothingToStash),
                _ => e.into(),
            })?;
        info!("Stashed changes as {}", oid);
        Ok(oid.to_string())
    }

    /// Apply a stash (`stash@{n}`, `n`, or the latest when `None`), dropping it when `drop` is set
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn stash_apply(&mut self, reference: Option<&str>, drop: bool) -> Result<()> {
        let index = parse_stash_index(reference)?;
        let repo = self.repo_mut()?;
        let mut options = StashApplyOptions::new();

        let applied = if drop {
            repo.stash_pop(index, Some(&mut options))
        } else {
            repo.stash_apply(index, Some(&mut options))
        };
        applied.map_err(|e| match e.code() {
            ErrorCode::NotFound => {
                Error::from(GitError::InvalidRef(format!("stash@{{{}}}", index)))
            }
            ErrorCode::Conflict | ErrorCode::MergeConflict => Error::from(GitError::MergeFailed(
                "stashed changes conflict with the working tree".to_string(),
            )),
            _ => e.into(),
        })?;
        info!("Applied stash@{{{}}}", index);
        Ok(())
    }

    pub fn stash_list(&mut self) -> Result<Vec<StashEntry>> {
        let repo = self.repo_mut()?;
        let mut entries = Vec::new();
        repo.stash_foreach(|index, message, oid| {
            entries.push(StashEntry {
                index,
                message: message.to_string(),
                commit_id: oid.to_string(),
            });
            true
        })?;
        Ok(entries)
    }

    // Internals

    fn ensure_not_closed(&self) -> Result<()> {
        if self.state == HandleState::Closed {
            return Err(GitError::Closed(self.path.clone()).into());
        }
        Ok(())
    }

    fn repo(&self) -> Result<&Repository> {
        self.ensure_not_closed()?;
        self.repo
            .as_ref()
            .ok_or_else(|| GitError::NotARepository(self.path.clone()).into())
    }

    fn repo_mut(&mut self) -> Result<&mut Repository> {
        self.ensure_not_closed()?;
        let path = self.path.clone();
        self.repo
            .as_mut()
            .ok_or_else(|| GitError::NotARepository(path).into())
    }

    fn workdir(&self) -> Result<PathBuf> {
        self.repo()?
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| GitError::OperationFailed("repository has no working tree".to_string()).into())
    }

    /// Run a mutating operation, clearing stale lock files and retrying once on lock contention
    fn with_lock_recovery<T>(
        &self,
        operation: &str,
        mut op: impl FnMut(&Repository) -> Result<T>,
    ) -> Result<T> {
        let repo = self.repo()?;
        let git_dir = repo.path().to_path_buf();

        RetryPolicy::LOCK_RECOVERY
            .run(
                || op(repo),
                Error::is_lock_contention,
                |e| {
                    warn!("{} hit a lock ({}), clearing stale locks and retrying", operation, e);
                    clear_stale_locks(&git_dir);
                },
            )
            .map_err(|e| {
                if e.is_lock_contention() {
                    GitError::RepositoryLocked(self.path.clone()).into()
                } else {
                    e
                }
            })
    }
}

impl std::fmt::Debug for RepositoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryHandle")
            .field("path", &self.path)
            .field("state", &self.state)
            .finish()
    }
}

/// Callbacks shared by clone, fetch, pull and push
///
/// Supplied credentials are offered for user/password auth; otherwise the ssh
/// agent, the git credential helper and the platform default are tried.
fn remote_callbacks<'a>(
    credentials: Option<&'a Credentials>,
    progress: &'a ProgressReporter,
    attempts: &'a Cell<u32>,
) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();

    callbacks.credentials(move |url, username_from_url, allowed| {
        attempts.set(attempts.get() + 1);
        if attempts.get() > MAX_AUTH_ATTEMPTS {
            return Err(git2::Error::new(
                ErrorCode::Auth,
                git2::ErrorClass::Callback,
                "authentication failed: the remote rejected the credentials",
            ));
        }

        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            if let Some(credentials) = credentials {
                return Cred::userpass_plaintext(&credentials.username, credentials.password());
            }
            if let Ok(config) = git2::Config::open_default() {
                if let Ok(cred) = Cred::credential_helper(&config, url, username_from_url) {
                    return Ok(cred);
                }
            }
        }

        let username = username_from_url.unwrap_or("git");
        if allowed.contains(CredentialType::SSH_KEY) {
            if let Ok(cred) = Cred::ssh_key_from_agent(username) {
                return Ok(cred);
            }
        }
        if allowed.contains(CredentialType::USERNAME) {
            return Cred::username(username);
        }
        if allowed.contains(CredentialType::DEFAULT) {
            return Cred::default();
        }

        Err(git2::Error::new(
            ErrorCode::Auth,
            git2::ErrorClass::Callback,
            format!("no credentials available for {}", url),
        ))
    });

    callbacks.transfer_progress(move |stats| progress.transfer(&stats));
    callbacks
}

fn fetch_remote(
    repo: &Repository,
    remote_name: &str,
    credentials: Option<&Credentials>,
    prune: bool,
    progress: &ProgressReporter,
) -> Result<()> {
    check_cancelled(progress)?;
    let mut remote = repo
        .find_remote(remote_name)
        .map_err(|_| GitError::RemoteNotFound(remote_name.to_string()))?;

    let attempts = Cell::new(0);
    let mut options = git2::FetchOptions::new();
    options.remote_callbacks(remote_callbacks(credentials, progress, &attempts));
    if prune {
        options.prune(git2::FetchPrune::On);
    }

    remote
        .fetch::<&str>(&[], Some(&mut options), None)
        .map_err(|e| remote_failure(e, progress))?;

    let stats = remote.stats();
    debug!(
        "Fetched {} objects ({} bytes) from {}",
        stats.received_objects(),
        stats.received_bytes(),
        remote_name
    );
    Ok(())
}

/// Bring HEAD up to `theirs`: nothing, fast-forward, or a merge commit
fn integrate(
    repo: &Repository,
    theirs: &AnnotatedCommit<'_>,
    label: &str,
) -> Result<MergeOutcome> {
    let (analysis, _) = repo.merge_analysis(&[theirs])?;

    if analysis.is_up_to_date() {
        return Ok(MergeOutcome::UpToDate);
    }
    if analysis.is_fast_forward() || analysis.is_unborn() {
        fast_forward(repo, theirs.id())?;
        return Ok(MergeOutcome::FastForward);
    }

    repo.merge(&[theirs], None, Some(CheckoutBuilder::new().safe()))
        .map_err(|e| match e.code() {
            ErrorCode::Conflict | ErrorCode::MergeConflict => {
                if let Err(cleanup) = repo.cleanup_state() {
                    warn!("Failed to clear merge state: {}", cleanup);
                }
                Error::from(GitError::MergeFailed(format!(
                    "local changes would be overwritten by merging {}",
                    label
                )))
            }
            _ => e.into(),
        })?;
    let mut index = repo.index()?;
    if index.has_conflicts() {
        let paths = conflicted_paths(&index)?;
        return Err(GitError::MergeFailed(format!("conflicts in {}", paths.join(", "))).into());
    }

    let tree = repo.find_tree(index.write_tree()?)?;
    let ours = repo.head()?.peel_to_commit()?;
    let their_commit = repo.find_commit(theirs.id())?;
    let sig = signature(repo, None)?;
    let oid = repo.commit(
        Some("HEAD"),
        &sig,
        &sig,
        &format!("Merge {}", label),
        &tree,
        &[&ours, &their_commit],
    )?;
    repo.cleanup_state()?;
    Ok(MergeOutcome::Merged(oid.to_string()))
}

fn fast_forward(repo: &Repository, target: git2::Oid) -> Result<()> {
    let head_ref = repo.find_reference("HEAD")?;
    let branch_ref = head_ref
        .symbolic_target()
        .ok_or_else(|| GitError::InvalidRef("HEAD is detached".to_string()))?
        .to_string();

    let object = repo.find_object(target, None)?;
    repo.checkout_tree(&object, Some(CheckoutBuilder::new().safe()))?;

    let message = format!("fast-forward to {}", target);
    match repo.find_reference(&branch_ref) {
        Ok(mut reference) => {
            reference.set_target(target, &message)?;
        }
        Err(_) => {
            repo.reference(&branch_ref, target, true, &message)?;
        }
    }
    repo.set_head(&branch_ref)?;
    Ok(())
}

/// Replay local commits on top of `upstream`; any conflict aborts the rebase
fn rebase_onto(repo: &Repository, upstream: &AnnotatedCommit<'_>) -> Result<PullOutcome> {
    let (analysis, _) = repo.merge_analysis(&[upstream])?;
    if analysis.is_up_to_date() {
        return Ok(PullOutcome::UpToDate);
    }
    if analysis.is_fast_forward() || analysis.is_unborn() {
        fast_forward(repo, upstream.id())?;
        return Ok(PullOutcome::FastForward);
    }

    let sig = signature(repo, None)?;
    let mut rebase = repo.rebase(None, Some(upstream), None, None)?;
    let mut replayed = 0;

    while let Some(step) = rebase.next() {
        if let Err(e) = step.map(|_| ()) {
            rebase.abort()?;
            return Err(GitError::MergeFailed(format!("rebase stopped: {}", e.message())).into());
        }
        if repo.index()?.has_conflicts() {
            rebase.abort()?;
            return Err(GitError::MergeFailed(
                "rebase hit conflicts and was aborted".to_string(),
            )
            .into());
        }
        match rebase.commit(None, &sig, None) {
            Ok(_) => replayed += 1,
            // Patch already present upstream
            Err(e) if e.code() == ErrorCode::Applied => {}
            Err(e) => {
                rebase.abort()?;
                return Err(e.into());
            }
        }
    }

    rebase.finish(Some(&sig))?;
    Ok(PullOutcome::Rebased(replayed))
}

fn conflicted_paths(index: &git2::Index) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    for conflict in index.conflicts()? {
        let conflict = conflict?;
        if let Some(entry) = conflict.our.or(conflict.their).or(conflict.ancestor) {
            paths.push(String::from_utf8_lossy(&entry.path).into_owned());
        }
    }
    Ok(paths)
}

/// Author override, then git config, then a placeholder
fn signature(repo: &Repository, author: Option<&Author>) -> Result<Signature<'static>> {
    if let Some(author) = author {
        return Ok(Signature::now(&author.name, &author.email)?);
    }
    match repo.signature() {
        Ok(sig) => Ok(sig),
        Err(_) => Ok(Signature::now(FALLBACK_NAME, FALLBACK_EMAIL)?),
    }
}

fn head_commit(repo: &Repository) -> Result<Option<git2::Commit<'_>>> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?)),
        Err(e) if is_unborn(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn is_unborn(error: &git2::Error) -> bool {
    matches!(error.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound)
}

/// Name of the checked-out branch, also when it has no commits yet
fn current_branch_name(repo: &Repository) -> Result<String> {
    match repo.head() {
        Ok(head) if head.is_branch() => Ok(head.shorthand().unwrap_or_default().to_string()),
        Ok(_) => Err(GitError::InvalidRef("HEAD is detached".to_string()).into()),
        Err(e) if is_unborn(&e) => {
            let head = repo.find_reference("HEAD")?;
            let target = head
                .symbolic_target()
                .ok_or_else(|| GitError::InvalidRef("HEAD is detached".to_string()))?;
            Ok(target.strip_prefix("refs/heads/").unwrap_or(target).to_string())
        }
        Err(e) => Err(e.into()),
    }
}

/// Branch name for display: the short commit id when detached
fn display_branch(repo: &Repository) -> String {
    if let Ok(name) = current_branch_name(repo) {
        return name;
    }
    repo.head()
        .ok()
        .and_then(|head| head.target())
        .map(|oid| oid.to_string().chars().take(SHORT_ID_LEN).collect())
        .unwrap_or_else(|| "HEAD".to_string())
}

fn head_tracking_counts(repo: &Repository) -> Result<(usize, usize)> {
    let head = repo.head()?;
    if !head.is_branch() {
        return Ok((0, 0));
    }
    let name = head.shorthand().unwrap_or_default();
    let branch = repo.find_branch(name, BranchType::Local)?;
    branch_tracking_counts(repo, &branch)
}

fn branch_tracking_counts(repo: &Repository, branch: &git2::Branch<'_>) -> Result<(usize, usize)> {
    let Ok(upstream) = branch.upstream() else {
        return Ok((0, 0));
    };
    match (branch.get().target(), upstream.get().target()) {
        (Some(local), Some(remote)) => Ok(repo.graph_ahead_behind(local, remote)?),
        _ => Ok((0, 0)),
    }
}

fn set_upstream_if_missing(repo: &Repository, branch: &str, remote: &str) {
    let Ok(mut local) = repo.find_branch(branch, BranchType::Local) else {
        return;
    };
    if local.upstream().is_ok() {
        return;
    }
    let upstream = format!("{}/{}", remote, branch);
    match local.set_upstream(Some(&upstream)) {
        Ok(()) => debug!("Set upstream of {} to {}", branch, upstream),
        Err(e) => warn!("Could not set upstream of {} to {}: {}", branch, upstream, e),
    }
}

fn remote_names(repo: &Repository) -> Result<Vec<String>> {
    Ok(repo
        .remotes()?
        .iter()
        .flatten()
        .map(str::to_string)
        .collect())
}

fn status_options() -> StatusOptions {
    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false)
        .renames_head_to_index(true);
    options
}

fn index_status(status: Status) -> Option<FileStatus> {
    if status.contains(Status::INDEX_NEW) {
        Some(FileStatus::Added)
    } else if status.contains(Status::INDEX_DELETED) {
        Some(FileStatus::Deleted)
    } else if status.contains(Status::INDEX_RENAMED) {
        Some(FileStatus::Renamed)
    } else if status.intersects(Status::INDEX_MODIFIED | Status::INDEX_TYPECHANGE) {
        Some(FileStatus::Modified)
    } else {
        None
    }
}

fn worktree_status(status: Status) -> Option<FileStatus> {
    if status.contains(Status::WT_DELETED) {
        Some(FileStatus::Deleted)
    } else if status.contains(Status::WT_RENAMED) {
        Some(FileStatus::Renamed)
    } else if status.intersects(Status::WT_MODIFIED | Status::WT_TYPECHANGE) {
        Some(FileStatus::Modified)
    } else {
        None
    }
}

fn changed(path: String, status: FileStatus, is_staged: bool) -> ChangedFile {
    ChangedFile {
        path,
        status,
        is_staged,
    }
}

fn lossy_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn check_cancelled(progress: &ProgressReporter) -> Result<()> {
    if progress.is_cancelled() {
        return Err(GitError::Cancelled(progress.operation().to_string()).into());
    }
    Ok(())
}

/// Error a libgit2 callback returns to stop the transfer once cancelled
fn abort_if_cancelled(progress: &ProgressReporter) -> std::result::Result<(), git2::Error> {
    if progress.is_cancelled() {
        return Err(git2::Error::from_str(&format!(
            "{} cancelled",
            progress.operation()
        )));
    }
    Ok(())
}

/// Cancellation wins over whatever error libgit2 reported for the abort
fn remote_failure(error: git2::Error, progress: &ProgressReporter) -> Error {
    if progress.is_cancelled() {
        return GitError::Cancelled(progress.operation().to_string()).into();
    }
    classify_transport_error(&error).into()
}

/// Parse `stash@{n}` or a bare index; `None` is the latest stash
pub fn parse_stash_index(reference: Option<&str>) -> Result<usize> {
    let Some(reference) = reference.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(0);
    };
    let digits = reference
        .strip_prefix("stash@{")
        .and_then(|rest| rest.strip_suffix('}'))
        .unwrap_or(reference);
    digits
        .parse()
        .map_err(|_| GitError::InvalidRef(reference.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::types::OperationKind;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn init_repo() -> (TempDir, RepositoryHandle) {
        let temp = TempDir::new().unwrap();
        let mut handle = RepositoryHandle::new(temp.path());
        handle.init().unwrap();
        let mut config = handle.repo().unwrap().config().unwrap();
        config.set_str("user.name", "Test User").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
        (temp, handle)
    }

    fn write(temp: &TempDir, name: &str, content: &str) {
        std::fs::write(temp.path().join(name), content).unwrap();
    }

    fn commit_all(handle: &RepositoryHandle, message: &str) -> Commit {
        handle.stage_all().unwrap();
        handle.commit(&CommitOptions::new(message)).unwrap()
    }

    fn paths(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_open_non_repository() {
        let temp = TempDir::new().unwrap();
        let mut handle = RepositoryHandle::new(temp.path());
        assert!(!handle.open().unwrap());
        assert_eq!(handle.state(), HandleState::NotARepository);
        assert!(handle.status().is_err());
    }

    #[test]
    fn test_first_commit() {
        let (temp, handle) = init_repo();
        write(&temp, "a.txt", "hello\n");

        let commit = commit_all(&handle, "first");
        assert_eq!(commit.message, "first");
        assert_eq!(commit.short_id.len(), SHORT_ID_LEN);

        let history = handle.commit_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].parent_ids.is_empty());
        assert!(handle.status().unwrap().is_clean);
    }

    #[test]
    fn test_history_on_unborn_branch_is_empty() {
        let (_temp, handle) = init_repo();
        assert!(handle.commit_history(10).unwrap().is_empty());
    }

    #[test]
    fn test_nothing_to_commit() {
        let (temp, handle) = init_repo();
        write(&temp, "a.txt", "hello\n");
        commit_all(&handle, "first");

        let err = handle.commit(&CommitOptions::new("again")).unwrap_err();
        assert!(matches!(err, Error::Git(GitError::NothingToCommit)));

        let empty = CommitOptions {
            allow_empty: true,
            ..CommitOptions::new("empty")
        };
        assert!(handle.commit(&empty).is_ok());
    }

    #[test]
    fn test_deleted_file_is_staged_as_deletion() {
        let (temp, handle) = init_repo();
        write(&temp, "a.txt", "hello\n");
        commit_all(&handle, "first");

        std::fs::remove_file(temp.path().join("a.txt")).unwrap();
        let files = handle.changed_files().unwrap();
        assert_eq!(
            files,
            vec![changed("a.txt".to_string(), FileStatus::Deleted, false)]
        );

        handle.stage(&paths(&["a.txt"])).unwrap();
        let files = handle.changed_files().unwrap();
        assert_eq!(
            files,
            vec![changed("a.txt".to_string(), FileStatus::Deleted, true)]
        );
    }

    #[test]
    fn test_partially_staged_file_appears_twice() {
        let (temp, handle) = init_repo();
        write(&temp, "a.txt", "one\n");
        commit_all(&handle, "first");

        write(&temp, "a.txt", "two\n");
        handle.stage(&paths(&["a.txt"])).unwrap();
        write(&temp, "a.txt", "three\n");
        write(&temp, "new.txt", "new\n");

        let files = handle.changed_files().unwrap();
        assert_eq!(
            files,
            vec![
                changed("a.txt".to_string(), FileStatus::Modified, true),
                changed("a.txt".to_string(), FileStatus::Modified, false),
                changed("new.txt".to_string(), FileStatus::Untracked, false),
            ]
        );

        let status = handle.status().unwrap();
        assert!(status.has_staged_changes);
        assert!(status.has_unstaged_changes);
        assert!(!status.is_clean);
    }

    #[test]
    fn test_unstage() {
        let (temp, handle) = init_repo();
        write(&temp, "a.txt", "one\n");
        commit_all(&handle, "first");

        write(&temp, "a.txt", "two\n");
        handle.stage(&paths(&["a.txt"])).unwrap();
        handle.unstage(&paths(&["a.txt"])).unwrap();

        let files = handle.changed_files().unwrap();
        assert!(files.iter().all(|f| !f.is_staged));
    }

    #[test]
    fn test_unstage_before_first_commit() {
        let (temp, handle) = init_repo();
        write(&temp, "a.txt", "one\n");
        handle.stage_all().unwrap();
        handle.unstage(&paths(&["a.txt"])).unwrap();

        let files = handle.changed_files().unwrap();
        assert_eq!(
            files,
            vec![changed("a.txt".to_string(), FileStatus::Untracked, false)]
        );
    }

    #[test]
    fn test_discard_changes() {
        let (temp, handle) = init_repo();
        write(&temp, "a.txt", "one\n");
        commit_all(&handle, "first");

        write(&temp, "a.txt", "changed\n");
        write(&temp, "scratch.txt", "junk\n");
        handle
            .discard_changes(&paths(&["a.txt", "scratch.txt"]))
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(temp.path().join("a.txt")).unwrap(),
            "one\n"
        );
        assert!(!temp.path().join("scratch.txt").exists());
        assert!(handle.status().unwrap().is_clean);
    }

    #[test]
    fn test_stage_recovers_from_stale_lock() {
        let (temp, handle) = init_repo();
        write(&temp, "a.txt", "one\n");
        std::fs::write(temp.path().join(".git").join("index.lock"), "").unwrap();

        handle.stage(&paths(&["a.txt"])).unwrap();

        assert!(!temp.path().join(".git").join("index.lock").exists());
        let files = handle.changed_files().unwrap();
        assert_eq!(
            files,
            vec![changed("a.txt".to_string(), FileStatus::Added, true)]
        );
    }

    #[test]
    fn test_file_diff_unstaged_and_staged() {
        let (temp, handle) = init_repo();
        write(&temp, "a.txt", "one\ntwo\n");
        commit_all(&handle, "first");

        write(&temp, "a.txt", "one\n2\n");
        let diff = handle.file_diff("a.txt", false).unwrap();
        assert_eq!(diff.status, FileStatus::Modified);
        assert_eq!(diff.hunks.len(), 1);
        assert_eq!(diff.hunks[0].line_stats(), (1, 1));

        assert!(handle.file_diff("a.txt", true).unwrap().is_unchanged());
        handle.stage(&paths(&["a.txt"])).unwrap();
        assert_eq!(handle.file_diff("a.txt", true).unwrap().hunks.len(), 1);
    }

    #[test]
    fn test_file_diff_untracked_file() {
        let (temp, handle) = init_repo();
        write(&temp, "a.txt", "one\n");
        commit_all(&handle, "first");
        write(&temp, "new.txt", "fresh\n");

        let diff = handle.file_diff("new.txt", false).unwrap();
        assert_eq!(diff.hunks.len(), 1);
        assert_eq!(diff.hunks[0].line_stats(), (1, 0));
    }

    #[test]
    fn test_branches_and_checkout() {
        let (temp, handle) = init_repo();
        write(&temp, "a.txt", "one\n");
        commit_all(&handle, "first");
        let main = current_branch_name(handle.repo().unwrap()).unwrap();

        handle.create_branch("feature", true).unwrap();
        assert_eq!(handle.status().unwrap().current_branch, "feature");

        let branches = handle.branches().unwrap();
        assert_eq!(branches.len(), 2);
        assert!(branches.iter().any(|b| b.name == "feature" && b.is_current));

        write(&temp, "b.txt", "two\n");
        commit_all(&handle, "feature work");

        handle.checkout(&main).unwrap();
        let err = handle.delete_branch("feature", false).unwrap_err();
        assert!(matches!(err, Error::Git(GitError::BranchNotMerged(_))));

        assert_eq!(handle.merge("feature").unwrap(), MergeOutcome::FastForward);
        assert!(temp.path().join("b.txt").exists());
        handle.delete_branch("feature", false).unwrap();
    }

    #[test]
    fn test_cannot_delete_current_branch() {
        let (temp, handle) = init_repo();
        write(&temp, "a.txt", "one\n");
        commit_all(&handle, "first");
        let main = current_branch_name(handle.repo().unwrap()).unwrap();

        let err = handle.delete_branch(&main, true).unwrap_err();
        assert!(matches!(err, Error::Git(GitError::BranchCheckedOut(_))));
    }

    #[test]
    fn test_remotes() {
        let (_temp, handle) = init_repo();
        assert!(handle.remotes().unwrap().is_empty());

        handle
            .add_remote("origin", "https://example.com/repo.git")
            .unwrap();
        let remotes = handle.remotes().unwrap();
        assert_eq!(remotes[0].name, "origin");
        assert_eq!(remotes[0].push_url, "https://example.com/repo.git");
        let status = handle.status().unwrap();
        assert!(status.has_remote);
        assert_eq!(
            status.remote_url.as_deref(),
            Some("https://example.com/repo.git")
        );

        handle.remove_remote("origin").unwrap();
        let err = handle.remove_remote("origin").unwrap_err();
        assert!(matches!(err, Error::Git(GitError::RemoteNotFound(_))));
    }

    #[test]
    fn test_stash_round() {
        let (temp, mut handle) = init_repo();
        write(&temp, "a.txt", "one\n");
        commit_all(&handle, "first");

        assert!(matches!(
            handle.stash(None).unwrap_err(),
            Error::Git(GitError::NothingToStash)
        ));

        write(&temp, "a.txt", "two\n");
        handle.stash(Some("wip")).unwrap();
        assert!(handle.status().unwrap().is_clean);

        let entries = handle.stash_list().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].message.contains("wip"));

        handle.stash_apply(Some("stash@{0}"), true).unwrap();
        assert_eq!(
            std::fs::read_to_string(temp.path().join("a.txt")).unwrap(),
            "two\n"
        );
        assert!(handle.stash_list().unwrap().is_empty());
    }

    #[test]
    fn test_reset_hard() {
        let (temp, handle) = init_repo();
        write(&temp, "a.txt", "one\n");
        let first = commit_all(&handle, "first");
        write(&temp, "a.txt", "two\n");
        commit_all(&handle, "second");

        handle.reset(&first.id, ResetMode::Hard).unwrap();
        assert_eq!(handle.commit_history(10).unwrap().len(), 1);
        assert_eq!(
            std::fs::read_to_string(temp.path().join("a.txt")).unwrap(),
            "one\n"
        );
    }

    #[test]
    fn test_push_pull_through_bare_remote() {
        let (temp, handle) = init_repo();
        write(&temp, "a.txt", "one\n");
        commit_all(&handle, "first");
        let branch = current_branch_name(handle.repo().unwrap()).unwrap();

        let remote_dir = TempDir::new().unwrap();
        Repository::init_bare(remote_dir.path()).unwrap();
        let url = remote_dir.path().to_string_lossy().to_string();
        handle.add_remote("origin", &url).unwrap();

        let push = ProgressReporter::new(OperationKind::Push);
        handle.push(&PushOptions::default(), &push).unwrap();
        // Pushing again with nothing new is still a success
        handle.push(&PushOptions::default(), &push).unwrap();
        let tracking = handle
            .branches()
            .unwrap()
            .into_iter()
            .find(|b| b.name == branch)
            .and_then(|b| b.tracking_branch);
        assert_eq!(tracking, Some(format!("origin/{}", branch)));

        // Second clone advances the remote
        let other_dir = TempDir::new().unwrap();
        let mut other = RepositoryHandle::new(other_dir.path());
        let clone = CloneOptions {
            url: url.clone(),
            directory: other_dir.path().join("work"),
            branch: Some(branch.clone()),
            depth: None,
            credentials: None,
        };
        other
            .clone_repository(&clone, &ProgressReporter::new(OperationKind::Clone))
            .unwrap();
        std::fs::write(other.path().join("b.txt"), "two\n").unwrap();
        other.stage_all().unwrap();
        other
            .commit(&CommitOptions {
                author: Some(Author {
                    name: "Other".to_string(),
                    email: "other@example.com".to_string(),
                }),
                ..CommitOptions::new("second")
            })
            .unwrap();
        other.push(&PushOptions::default(), &push).unwrap();

        // Diverge locally, then the push is rejected as non-fast-forward
        write(&temp, "c.txt", "three\n");
        commit_all(&handle, "local");
        let err = handle.push(&PushOptions::default(), &push).unwrap_err();
        assert!(matches!(err, Error::Git(GitError::NonFastForward(_))));

        let pull = ProgressReporter::new(OperationKind::Pull);
        let outcome = handle.pull(&PullOptions::default(), &pull).unwrap();
        assert!(matches!(outcome, PullOutcome::Merged(_)));
        assert!(temp.path().join("b.txt").exists());
        handle.push(&PushOptions::default(), &push).unwrap();
    }

    #[test]
    fn test_cancelled_before_start() {
        let (_temp, handle) = init_repo();
        handle.add_remote("origin", "https://example.com/repo.git").unwrap();

        let cancel = crate::git::CancelToken::new();
        cancel.cancel();
        let progress = ProgressReporter::new(OperationKind::Fetch).with_cancel(cancel);
        let err = handle.fetch(&FetchOptions::default(), &progress).unwrap_err();
        assert!(matches!(err, Error::Git(GitError::Cancelled(_))));
    }

    #[test]
    fn test_closed_handle_rejects_operations() {
        let (_temp, mut handle) = init_repo();
        handle.close();
        handle.close();
        assert_eq!(handle.state(), HandleState::Closed);
        assert!(matches!(
            handle.status().unwrap_err(),
            Error::Git(GitError::Closed(_))
        ));
    }

    #[test]
    fn test_stage_deleted_directory() {
        let (temp, handle) = init_repo();
        std::fs::create_dir(temp.path().join("gone")).unwrap();
        write(&temp, "gone/x.txt", "x\n");
        write(&temp, "gone/y.txt", "y\n");
        write(&temp, "kept.txt", "k\n");
        commit_all(&handle, "first");

        std::fs::remove_dir_all(temp.path().join("gone")).unwrap();
        handle.stage(&paths(&["gone"])).unwrap();

        let files = handle.changed_files().unwrap();
        assert_eq!(
            files,
            vec![
                changed("gone/x.txt".to_string(), FileStatus::Deleted, true),
                changed("gone/y.txt".to_string(), FileStatus::Deleted, true),
            ]
        );
    }

    #[test]
    fn test_unstage_recovers_from_stale_lock() {
        let (temp, handle) = init_repo();
        write(&temp, "a.txt", "one\n");
        commit_all(&handle, "first");
        write(&temp, "a.txt", "two\n");
        handle.stage(&paths(&["a.txt"])).unwrap();

        let lock = temp.path().join(".git").join("index.lock");
        std::fs::write(&lock, "").unwrap();
        handle.unstage(&paths(&["a.txt"])).unwrap();

        assert!(!lock.exists());
        let files = handle.changed_files().unwrap();
        assert_eq!(
            files,
            vec![changed("a.txt".to_string(), FileStatus::Modified, false)]
        );
    }

    #[test]
    fn test_pull_into_dirty_tree_reports_merge_failure() {
        let (temp, handle) = init_repo();
        write(&temp, "a.txt", "one\n");
        commit_all(&handle, "first");
        let branch = current_branch_name(handle.repo().unwrap()).unwrap();

        let remote_dir = TempDir::new().unwrap();
        Repository::init_bare(remote_dir.path()).unwrap();
        let url = remote_dir.path().to_string_lossy().to_string();
        handle.add_remote("origin", &url).unwrap();
        let push = ProgressReporter::new(OperationKind::Push);
        handle.push(&PushOptions::default(), &push).unwrap();

        let other_dir = TempDir::new().unwrap();
        let mut other = RepositoryHandle::new(other_dir.path());
        let clone = CloneOptions {
            url,
            directory: other_dir.path().join("work"),
            branch: Some(branch),
            depth: None,
            credentials: None,
        };
        other
            .clone_repository(&clone, &ProgressReporter::new(OperationKind::Clone))
            .unwrap();
        std::fs::write(other.path().join("a.txt"), "upstream\n").unwrap();
        other.stage_all().unwrap();
        other
            .commit(&CommitOptions {
                author: Some(Author {
                    name: "Other".to_string(),
                    email: "other@example.com".to_string(),
                }),
                ..CommitOptions::new("upstream edit")
            })
            .unwrap();
        other.push(&PushOptions::default(), &push).unwrap();

        // Diverged history plus an uncommitted edit to the file upstream changed
        write(&temp, "b.txt", "local\n");
        commit_all(&handle, "local");
        write(&temp, "a.txt", "dirty\n");

        let pull = ProgressReporter::new(OperationKind::Pull);
        let err = handle.pull(&PullOptions::default(), &pull).unwrap_err();
        assert!(matches!(err, Error::Git(GitError::MergeFailed(_))));
        assert_eq!(
            std::fs::read_to_string(temp.path().join("a.txt")).unwrap(),
            "dirty\n"
        );
        assert_eq!(
            handle.repo().unwrap().state(),
            git2::RepositoryState::Clean
        );
    }

    #[test]
    fn test_cancellation_aborts_transfer_callbacks() {
        let cancel = crate::git::CancelToken::new();
        let progress = ProgressReporter::new(OperationKind::Push).with_cancel(cancel.clone());
        assert!(abort_if_cancelled(&progress).is_ok());

        cancel.cancel();
        let err = abort_if_cancelled(&progress).unwrap_err();
        assert!(matches!(
            remote_failure(err, &progress),
            Error::Git(GitError::Cancelled(_))
        ));
    }

    #[test]
    fn test_parse_stash_index() {
        assert_eq!(parse_stash_index(None).unwrap(), 0);
        assert_eq!(parse_stash_index(Some("stash@{2}")).unwrap(), 2);
        assert_eq!(parse_stash_index(Some("3")).unwrap(), 3);
        assert!(parse_stash_index(Some("stash@{x}")).is_err());
    }
}
