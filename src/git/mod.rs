//! Git operations on local repositories via libgit2
//!
//! - `RepositoryHandle` - all operations on one working directory
//! - `parse_hunks` - unified diff text to structured hunks
//! - `classify_push` - per-ref push outcomes to success or a typed error
//! - `RetryPolicy` - stale lock recovery for mutating operations
//! - `ProgressReporter` - progress callbacks and cancellation for network operations

mod diff;
mod handle;
mod lock;
mod progress;
mod push;
mod types;

pub use diff::*;
pub use handle::*;
pub use lock::*;
pub use progress::*;
pub use push::*;
pub use types::*;
