//! Named achievement predicates and idempotent grants.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::UserLocks;
use crate::error::{CoreError, Result};
use crate::model::{Session, Task, TaskGroup, User};
use crate::storage::{DocumentStore, SessionQuery};

pub const NEWCOMER: &str = "NEWCOMER";
pub const ROAD_PLANNER: &str = "ROAD_PLANNER";
pub const ROAD_MASTER: &str = "ROAD_MASTER";
pub const TASK_ADDICT: &str = "TASK_ADDICT";
pub const SESSION_STARTER: &str = "SESSION_STARTER";
pub const STUDY_GROUP: &str = "STUDY_GROUP";

/// Snapshot a predicate is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct AchievementContext<'a> {
    pub user: &'a User,
    pub sessions: &'a [Session],
    pub task_groups: &'a [TaskGroup],
    /// Session involved in the triggering event.
    pub session: Option<&'a Session>,
    pub task_group: Option<&'a TaskGroup>,
    pub task: Option<&'a Task>,
}

impl<'a> AchievementContext<'a> {
    pub fn new(user: &'a User) -> Self {
        Self {
            user,
            sessions: &[],
            task_groups: &[],
            session: None,
            task_group: None,
            task: None,
        }
    }
}

/// Pure predicate over a snapshot.
pub type Predicate = fn(&AchievementContext<'_>) -> bool;

#[derive(Clone)]
pub struct Achievement {
    pub name: &'static str,
    pub predicate: Predicate,
}

impl std::fmt::Debug for Achievement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Achievement").field("name", &self.name).finish()
    }
}

/// Ordered set of achievements.
#[derive(Debug, Clone)]
pub struct AchievementRegistry {
    achievements: Vec<Achievement>,
}

impl AchievementRegistry {
    pub fn empty() -> Self {
        Self {
            achievements: Vec::new(),
        }
    }

    /// The built-in achievement set.
    pub fn builtin() -> Self {
        Self::empty()
            .with(NEWCOMER, |_| true)
            .with(ROAD_PLANNER, |ctx| !ctx.task_groups.is_empty())
            .with(ROAD_MASTER, |ctx| ctx.task_groups.len() > 10)
            .with(TASK_ADDICT, |ctx| {
                ctx.task_groups.iter().any(|g| g.total_completed_tasks >= 3)
            })
            .with(SESSION_STARTER, |ctx| {
                ctx.sessions.iter().any(|s| s.creator == ctx.user.id)
            })
            .with(STUDY_GROUP, |ctx| ctx.session.is_some_and(|s| s.member_count > 1))
    }

    /// Register another achievement. A name registered twice keeps the first.
    pub fn with(mut self, name: &'static str, predicate: Predicate) -> Self {
        if !self.achievements.iter().any(|a| a.name == name) {
            self.achievements.push(Achievement { name, predicate });
        }
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.achievements.iter().map(|a| a.name)
    }

    /// Names satisfied by `ctx` and not yet held by the user, in registry order.
    pub fn evaluate(&self, ctx: &AchievementContext<'_>) -> Vec<&'static str> {
        self.achievements
            .iter()
            .filter(|a| !ctx.user.has_achievement(a.name))
            .filter(|a| (a.predicate)(ctx))
            .map(|a| a.name)
            .collect()
    }
}

impl Default for AchievementRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Record `names` on `user` at `at`, keeping earlier grant times.
///
/// Returns the names that were actually new.
pub fn grant_achievements<'n>(
    user: &mut User,
    names: impl IntoIterator<Item = &'n str>,
    at: DateTime<Utc>,
) -> Vec<String> {
    let mut granted = Vec::new();
    for name in names {
        if !user.achievements.contains_key(name) {
            user.achievements.insert(name.to_string(), at);
            granted.push(name.to_string());
        }
    }
    granted
}

/// What caused an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AchievementTrigger {
    SessionCreated { session: Session },
    SessionJoined { session: Session },
    TaskGroupChanged {
        group: TaskGroup,
        #[serde(default)]
        task: Option<Task>,
    },
    /// Re-evaluate without a specific subject.
    Refresh,
}

/// Loads a user's activity, evaluates the registry and persists new grants.
#[derive(Clone)]
pub struct AchievementService {
    store: Arc<dyn DocumentStore>,
    registry: Arc<AchievementRegistry>,
    locks: UserLocks,
}

impl AchievementService {
    pub fn new(store: Arc<dyn DocumentStore>, registry: AchievementRegistry, locks: UserLocks) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            locks,
        }
    }

    pub fn registry(&self) -> &AchievementRegistry {
        &self.registry
    }

    /// Evaluate for `user_id` and grant everything newly satisfied in one write.
    ///
    /// # Errors
    /// `NotFound` if the user has no profile; store failures otherwise.
    pub async fn trigger(&self, user_id: &str, trigger: &AchievementTrigger) -> Result<Vec<String>> {
        let _guard = self.locks.acquire(user_id).await;
        let mut user = self
            .store
            .get_user(user_id)
            .await?
            .filter(|u| u.deleted_at.is_none())
            .ok_or_else(|| CoreError::not_found("User", user_id))?;

        let query = SessionQuery::for_user(user_id);
        let (sessions, task_groups) = tokio::try_join!(
            self.store.query_sessions(&query),
            self.store.task_groups_by_creator(user_id),
        )?;

        let (session, task_group, task) = match trigger {
            AchievementTrigger::SessionCreated { session }
            | AchievementTrigger::SessionJoined { session } => (Some(session), None, None),
            AchievementTrigger::TaskGroupChanged { group, task } => (None, Some(group), task.as_ref()),
            AchievementTrigger::Refresh => (None, None, None),
        };
        let ctx = AchievementContext {
            user: &user,
            sessions: &sessions,
            task_groups: &task_groups,
            session,
            task_group,
            task,
        };
        let satisfied = self.registry.evaluate(&ctx);
        if satisfied.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let granted = grant_achievements(&mut user, satisfied, now);
        user.updated_at = now;
        self.store.put_user(&user).await?;
        for name in &granted {
            info!(user_id, achievement = %name, "achievement unlocked");
        }
        Ok(granted)
    }
}
