pub mod config;
pub mod database;

pub use config::EngineConfig;
pub use database::{Database, FeedbackEntry, RuleFeedbackCounts};

use std::path::PathBuf;

/// Returns `~/.nudge/`, creating it if it doesn't exist.
pub fn data_dir() -> PathBuf {
    let dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nudge");
    std::fs::create_dir_all(&dir).ok();
    dir
}
