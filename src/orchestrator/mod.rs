//! Repository orchestration
//!
//! - `RepositoryOrchestrator` - handle registry, current repository, remote operation tracking
//! - `GitOutcome` - success / error / in-progress result of every public operation
//! - `PublishedState` - watch channels for status, changes, branches, commits and progress

mod manager;
mod outcome;
mod state;

pub use manager::*;
pub use outcome::*;
pub use state::*;
