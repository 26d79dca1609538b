//! Experience, levels and achievements.
//!
//! Both writers load a user, modify it and store it back, so they share a
//! per-user lock to keep concurrent grants from overwriting each other.

pub mod achievement;
pub mod experience;

pub use achievement::{
    grant_achievements, Achievement, AchievementContext, AchievementRegistry, AchievementService,
    AchievementTrigger,
};
pub use experience::{
    grant_experience, required_experience, ExperienceLedger, ExperienceRewards, LevelProgress,
    Reward, LEVEL_UP_POINTS,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// Per-user async locks. Clones share the same table.
#[derive(Clone, Default)]
pub struct UserLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl UserLocks {
    pub async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // Drop entries nobody is holding or waiting on.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(user_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}
