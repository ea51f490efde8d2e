//! Configuration and persistence module
//!
//! Handles:
//! - User configuration (`config.toml` in the platform config directory)
//! - Persistent preferences (`preferences.json` in the data directory)

mod settings;
mod storage;

pub use settings::*;
pub use storage::*;
