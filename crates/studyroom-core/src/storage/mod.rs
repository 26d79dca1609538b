mod config;
pub mod database;
mod feed;
pub mod memory;
pub mod store;

pub use config::{
    Config, ExperienceConfig, PresenceConfig, SelfDestructConfig, StorageConfig, TimerConfig,
    VideoConfig,
};
pub use database::Database;
pub use memory::MemoryStore;
pub use store::{
    merge_member_states, DeletedFilter, DocumentStore, MemberStateChange, MemberStates, RealtimeStore,
    SessionQuery,
};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/studyroom[-dev]/` based on STUDYROOM_ENV.
///
/// Set STUDYROOM_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("STUDYROOM_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("studyroom-dev")
    } else {
        base_dir.join("studyroom")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(e.to_string()))?;
    Ok(dir)
}
