//! Value types returned by repository operations
//!
//! Everything here is a plain value: cloned out of the repository, never
//! shared-mutable, serializable for front ends.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::credentials::Credentials;

/// Number of hex characters in an abbreviated commit id
pub const SHORT_ID_LEN: usize = 7;

/// Snapshot of a repository's working state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryStatus {
    pub is_git_repo: bool,
    pub current_branch: String,
    pub has_remote: bool,
    pub remote_url: Option<String>,
    pub is_clean: bool,
    pub has_unstaged_changes: bool,
    pub has_staged_changes: bool,
    pub ahead_count: usize,
    pub behind_count: usize,
}

impl RepositoryStatus {
    /// Status reported for a directory without a `.git` directory
    pub fn not_a_repository() -> Self {
        Self::default()
    }
}

/// Change classification of a single path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
    Untracked,
    Conflicting,
    Renamed,
    Copied,
    Unchanged,
}

impl FileStatus {
    /// Single-letter code in the style of `git status --short`
    pub fn symbol(&self) -> char {
        match self {
            Self::Added => 'A',
            Self::Modified => 'M',
            Self::Deleted => 'D',
            Self::Untracked => '?',
            Self::Conflicting => 'U',
            Self::Renamed => 'R',
            Self::Copied => 'C',
            Self::Unchanged => ' ',
        }
    }
}

impl From<git2::Delta> for FileStatus {
    fn from(delta: git2::Delta) -> Self {
        match delta {
            git2::Delta::Added => Self::Added,
            git2::Delta::Deleted => Self::Deleted,
            git2::Delta::Modified | git2::Delta::Typechange => Self::Modified,
            git2::Delta::Renamed => Self::Renamed,
            git2::Delta::Copied => Self::Copied,
            git2::Delta::Untracked => Self::Untracked,
            git2::Delta::Conflicted => Self::Conflicting,
            git2::Delta::Unmodified | git2::Delta::Ignored | git2::Delta::Unreadable => {
                Self::Unchanged
            }
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Untracked => "untracked",
            Self::Conflicting => "conflicting",
            Self::Renamed => "renamed",
            Self::Copied => "copied",
            Self::Unchanged => "unchanged",
        };
        write!(f, "{}", name)
    }
}

/// A path with pending changes
///
/// A partially staged path shows up twice: once with `is_staged` set and once without.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub status: FileStatus,
    pub is_staged: bool,
}

/// A commit from repository history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    pub short_id: String,
    /// First line of the message
    pub message: String,
    pub full_message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp_millis: i64,
    pub parent_ids: Vec<String>,
}

impl Commit {
    pub(crate) fn from_git(commit: &git2::Commit<'_>) -> Self {
        let id = commit.id().to_string();
        let author = commit.author();
        Self {
            short_id: id.chars().take(SHORT_ID_LEN).collect(),
            id,
            message: commit.summary().unwrap_or("").to_string(),
            full_message: commit.message().unwrap_or("").to_string(),
            author_name: author.name().unwrap_or("Unknown").to_string(),
            author_email: author.email().unwrap_or("").to_string(),
            timestamp_millis: commit.time().seconds() * 1000,
            parent_ids: commit.parent_ids().map(|oid| oid.to_string()).collect(),
        }
    }
}

/// A local or remote-tracking branch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub is_local: bool,
    pub is_remote: bool,
    pub is_current: bool,
    pub tracking_branch: Option<String>,
    pub last_commit_id: Option<String>,
    pub ahead_count: usize,
    pub behind_count: usize,
}

/// A configured remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub fetch_url: String,
    /// Falls back to the fetch URL when no separate push URL is configured
    pub push_url: String,
}

/// Kind of a parsed diff line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffLineKind {
    Header,
    Context,
    Addition,
    Deletion,
}

/// A single line of a hunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub kind: DiffLineKind,
    /// Line text without its `+`/`-`/` ` prefix (the raw header for `Header` lines)
    pub content: String,
    pub old_line_number: Option<u32>,
    pub new_line_number: Option<u32>,
}

/// A contiguous block of changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffHunk {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// Render the range part of the hunk header, `@@ -o,oc +n,nc @@`
    pub fn range_header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_count, self.new_start, self.new_count
        )
    }

    /// Raw header text as it appeared in the diff
    pub fn header(&self) -> Option<&str> {
        self.lines
            .first()
            .filter(|l| l.kind == DiffLineKind::Header)
            .map(|l| l.content.as_str())
    }

    /// Count of added and removed lines
    pub fn line_stats(&self) -> (usize, usize) {
        self.lines.iter().fold((0, 0), |(add, del), line| match line.kind {
            DiffLineKind::Addition => (add + 1, del),
            DiffLineKind::Deletion => (add, del + 1),
            _ => (add, del),
        })
    }
}

/// Structured diff of a single file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub old_path: Option<String>,
    pub status: FileStatus,
    pub hunks: Vec<DiffHunk>,
    pub is_binary: bool,
}

impl FileDiff {
    /// Diff for a path with no changes
    pub fn unchanged(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            old_path: None,
            status: FileStatus::Unchanged,
            hunks: Vec::new(),
            is_binary: false,
        }
    }

    /// No hunks and not binary
    pub fn is_unchanged(&self) -> bool {
        self.hunks.is_empty() && !self.is_binary
    }
}

/// Which long-running operation a progress report belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Clone,
    Push,
    Pull,
    Fetch,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clone => write!(f, "Clone"),
            Self::Push => write!(f, "Push"),
            Self::Pull => write!(f, "Pull"),
            Self::Fetch => write!(f, "Fetch"),
        }
    }
}

/// Transient progress of an in-flight network operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationProgress {
    pub operation: OperationKind,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

impl OperationProgress {
    /// Completion in percent, 0 when the total is unknown
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            0
        } else {
            ((self.current.min(self.total) * 100) / self.total) as u8
        }
    }
}

/// Stash list entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashEntry {
    pub index: usize,
    pub message: String,
    pub commit_id: String,
}

/// Result of merging a branch into HEAD
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeOutcome {
    UpToDate,
    FastForward,
    Merged(String),
}

/// Result of a pull
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullOutcome {
    UpToDate,
    FastForward,
    Merged(String),
    /// Number of commits replayed
    Rebased(usize),
}

/// `git reset` flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetMode {
    Soft,
    Mixed,
    Hard,
}

impl From<ResetMode> for git2::ResetType {
    fn from(mode: ResetMode) -> Self {
        match mode {
            ResetMode::Soft => git2::ResetType::Soft,
            ResetMode::Mixed => git2::ResetType::Mixed,
            ResetMode::Hard => git2::ResetType::Hard,
        }
    }
}

/// Commit author override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

/// Options for [`crate::git::RepositoryHandle::commit`]
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub message: String,
    pub amend: bool,
    pub allow_empty: bool,
    pub author: Option<Author>,
}

impl CommitOptions {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Options for cloning
#[derive(Debug, Clone)]
pub struct CloneOptions {
    pub url: String,
    pub directory: PathBuf,
    pub branch: Option<String>,
    /// Shallow clone depth, `None` for full history
    pub depth: Option<u32>,
    pub credentials: Option<Credentials>,
}

/// Options for pushing
#[derive(Debug, Clone)]
pub struct PushOptions {
    pub remote: String,
    /// Branch to push, the current branch when `None`
    pub branch: Option<String>,
    pub force: bool,
    /// Record the pushed branch as upstream of the local branch
    pub set_upstream: bool,
    pub credentials: Option<Credentials>,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            remote: DEFAULT_REMOTE.to_string(),
            branch: None,
            force: false,
            set_upstream: true,
            credentials: None,
        }
    }
}

/// Options for pulling
#[derive(Debug, Clone)]
pub struct PullOptions {
    pub remote: String,
    /// Remote branch to integrate, the upstream of the current branch when `None`
    pub branch: Option<String>,
    pub rebase: bool,
    pub credentials: Option<Credentials>,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            remote: DEFAULT_REMOTE.to_string(),
            branch: None,
            rebase: false,
            credentials: None,
        }
    }
}

/// Options for fetching
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub remote: String,
    pub prune: bool,
    pub credentials: Option<Credentials>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            remote: DEFAULT_REMOTE.to_string(),
            prune: false,
            credentials: None,
        }
    }
}

/// Remote used when none is named
pub const DEFAULT_REMOTE: &str = "origin";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        let progress = OperationProgress {
            operation: OperationKind::Fetch,
            current: 25,
            total: 50,
            message: String::new(),
        };
        assert_eq!(progress.percent(), 50);

        let unknown = OperationProgress {
            total: 0,
            ..progress
        };
        assert_eq!(unknown.percent(), 0);
    }

    #[test]
    fn test_file_diff_unchanged() {
        let diff = FileDiff::unchanged("README.md");
        assert!(diff.is_unchanged());
        assert_eq!(diff.status, FileStatus::Unchanged);
    }

    #[test]
    fn test_status_symbols() {
        assert_eq!(FileStatus::Untracked.symbol(), '?');
        assert_eq!(FileStatus::Conflicting.symbol(), 'U');
        assert_eq!(FileStatus::Modified.to_string(), "modified");
    }
}
