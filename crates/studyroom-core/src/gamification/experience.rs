//! Experience curve and level-up bookkeeping.
//!
//! The requirement for the next level grows quadratically:
//! `required(level) = floor((level / 0.3)^2)`, computed in integers as
//! `level² * 100 / 9`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::UserLocks;
use crate::error::{CoreError, Result};
use crate::model::User;
use crate::storage::DocumentStore;

/// Flat points awarded for every level gained.
pub const LEVEL_UP_POINTS: u64 = 100;

/// Experience required to advance past `level`.
pub fn required_experience(level: u32) -> u64 {
    let level = u64::from(level.max(1));
    level * level * 100 / 9
}

/// What a single grant did to a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelProgress {
    pub experience_added: u64,
    pub levels_gained: u32,
    pub points_awarded: u64,
    pub level: u32,
}

/// Add `amount` experience to `user`, levelling up as many times as needed.
///
/// The grant carries a catch-up bonus of a tenth of what the user still
/// needs for the current level. Afterwards `experience < required(level)`.
pub fn grant_experience(user: &mut User, amount: u64) -> LevelProgress {
    user.level = user.level.max(1);
    if amount == 0 {
        return LevelProgress {
            level: user.level,
            ..LevelProgress::default()
        };
    }

    let bonus = required_experience(user.level).saturating_sub(user.experience) / 10;
    let added = amount + bonus;
    user.experience += added;

    let mut levels_gained = 0;
    let mut points = 0;
    while user.experience >= required_experience(user.level) {
        user.experience -= required_experience(user.level);
        user.level += 1;
        levels_gained += 1;
        points += LEVEL_UP_POINTS;
    }
    points += amount / 2;
    user.points += points;

    LevelProgress {
        experience_added: added,
        levels_gained,
        points_awarded: points,
        level: user.level,
    }
}

/// Rewardable engine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reward {
    /// Completed a work phase.
    Work,
    /// Completed a short or long break.
    Break,
    /// Joined a session.
    Join,
}

/// Experience amounts per [`Reward`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceRewards {
    pub work: u64,
    pub rest: u64,
    pub join: u64,
}

impl ExperienceRewards {
    pub fn amount(&self, reward: Reward) -> u64 {
        match reward {
            Reward::Work => self.work,
            Reward::Break => self.rest,
            Reward::Join => self.join,
        }
    }
}

impl Default for ExperienceRewards {
    fn default() -> Self {
        Self {
            work: 50,
            rest: 10,
            join: 5,
        }
    }
}

/// Applies grants to stored users.
#[derive(Clone)]
pub struct ExperienceLedger {
    store: Arc<dyn DocumentStore>,
    rewards: ExperienceRewards,
    locks: UserLocks,
}

impl ExperienceLedger {
    pub fn new(store: Arc<dyn DocumentStore>, rewards: ExperienceRewards, locks: UserLocks) -> Self {
        Self {
            store,
            rewards,
            locks,
        }
    }

    pub fn rewards(&self) -> ExperienceRewards {
        self.rewards
    }

    /// Load, grant and persist in one step.
    ///
    /// # Errors
    /// `NotFound` if the user has no profile; store failures otherwise.
    pub async fn award(&self, user_id: &str, reward: Reward) -> Result<LevelProgress> {
        let _guard = self.locks.acquire(user_id).await;
        let mut user = self
            .store
            .get_user(user_id)
            .await?
            .filter(|u| u.deleted_at.is_none())
            .ok_or_else(|| CoreError::not_found("User", user_id))?;

        let progress = grant_experience(&mut user, self.rewards.amount(reward));
        if progress.experience_added == 0 {
            return Ok(progress);
        }
        user.updated_at = chrono::Utc::now();
        self.store.put_user(&user).await?;

        if progress.levels_gained > 0 {
            info!(
                user_id,
                level = progress.level,
                gained = progress.levels_gained,
                "user levelled up"
            );
        }
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use proptest::prelude::*;

    #[test]
    fn curve_matches_reference_values() {
        assert_eq!(required_experience(1), 11);
        assert_eq!(required_experience(2), 44);
        assert_eq!(required_experience(3), 100);
        assert_eq!(required_experience(10), 1111);
        assert_eq!(required_experience(0), required_experience(1));
    }

    #[test]
    fn fresh_user_levels_up_on_first_work_grant() {
        let mut user = User::new("ada", "Ada");
        let progress = grant_experience(&mut user, 50);
        // 50 + 11/10 = 51; 51 - 11 = 40 < 44
        assert_eq!(progress.experience_added, 51);
        assert_eq!(user.level, 2);
        assert_eq!(user.experience, 40);
        assert_eq!(progress.levels_gained, 1);
        assert_eq!(user.points, LEVEL_UP_POINTS + 25);
    }

    #[test]
    fn single_grant_can_cross_several_levels() {
        let mut user = User::new("ada", "Ada");
        let progress = grant_experience(&mut user, 1000);
        // 1001 - 11 - 44 - 100 - 177 - 277 = 392 < 400
        assert_eq!(user.level, 6);
        assert_eq!(user.experience, 392);
        assert_eq!(progress.levels_gained, 5);
        assert_eq!(progress.points_awarded, 5 * LEVEL_UP_POINTS + 500);
    }

    #[test]
    fn zero_amount_is_a_no_op() {
        let mut user = User::new("ada", "Ada");
        user.experience = 3;
        let before = user.clone();
        let progress = grant_experience(&mut user, 0);
        assert_eq!(user, before);
        assert_eq!(progress.levels_gained, 0);
    }

    proptest! {
        #[test]
        fn experience_settles_below_requirement(
            level in 1u32..200,
            progress_pct in 0u64..100,
            amount in 0u64..100_000,
        ) {
            let mut user = User::new("p", "P");
            user.level = level;
            user.experience = required_experience(level) * progress_pct / 100;
            let before_level = user.level;
            let before_points = user.points;

            let progress = grant_experience(&mut user, amount);

            prop_assert!(user.experience < required_experience(user.level));
            prop_assert!(user.level >= before_level);
            prop_assert_eq!(user.level - before_level, progress.levels_gained);
            prop_assert_eq!(user.points - before_points, progress.points_awarded);
        }
    }

    #[tokio::test]
    async fn award_persists_and_requires_profile() {
        let store = Arc::new(MemoryStore::new());
        store.put_user(&User::new("ada", "Ada")).await.unwrap();
        let ledger = ExperienceLedger::new(store.clone(), ExperienceRewards::default(), UserLocks::default());

        let progress = ledger.award("ada", Reward::Join).await.unwrap();
        assert_eq!(progress.experience_added, 5 + 1);
        let stored = store.get_user("ada").await.unwrap().unwrap();
        assert_eq!(stored.experience, 6);
        assert_eq!(stored.points, 2);

        let err = ledger.award("ghost", Reward::Work).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
