//! Store contracts consumed by the engine.
//!
//! [`DocumentStore`] is the durable, authoritative record store.
//! [`RealtimeStore`] is the low-latency replica the UI listens to; it is
//! rebuildable from the durable record plus live presence.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::model::{MemberId, MemberState, Session, SessionRealtime, TaskGroup, User, Visibility};

/// Durable document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// Create or overwrite the session document.
    async fn put_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn delete_session(&self, id: &str) -> Result<(), StoreError>;

    /// Filtered listing, newest first.
    async fn query_sessions(&self, query: &SessionQuery) -> Result<Vec<Session>, StoreError>;

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError>;

    async fn put_user(&self, user: &User) -> Result<(), StoreError>;

    async fn put_task_group(&self, group: &TaskGroup) -> Result<(), StoreError>;

    async fn task_groups_by_creator(&self, creator: &str) -> Result<Vec<TaskGroup>, StoreError>;
}

/// Ephemeral realtime replica store.
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<SessionRealtime>, StoreError>;

    /// Replace the whole replica for a session.
    async fn put(&self, realtime: &SessionRealtime) -> Result<(), StoreError>;

    /// Replace the replica in one step, keeping member records a client
    /// changed since the writer last saw them (see [`merge_member_states`]).
    ///
    /// Returns the member states as written.
    async fn put_merged(
        &self,
        realtime: &SessionRealtime,
        seen: &MemberStates,
    ) -> Result<MemberStates, StoreError>;

    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;

    /// Write one member's presence record, as a connected client does.
    ///
    /// Returns `false` when the session has no replica.
    async fn put_member_state(
        &self,
        session_id: &str,
        state: &MemberState,
    ) -> Result<bool, StoreError>;

    /// Change notifications for existing member presence records.
    fn subscribe(&self, session_id: &str) -> broadcast::Receiver<MemberStateChange>;
}

/// Presence records keyed by member id.
pub type MemberStates = HashMap<MemberId, MemberState>;

/// Fold client writes into a replica about to be written.
///
/// `seen` is what the writer last read from or wrote to the store. A stored
/// record that moved away from `seen` while the writer left its own copy
/// alone belongs to the client and wins. Records the writer changed win over
/// the store, and members the writer dropped stay dropped.
pub fn merge_member_states(ours: &mut MemberStates, stored: &MemberStates, seen: &MemberStates) {
    for (id, mine) in ours.iter_mut() {
        let Some(theirs) = stored.get(id) else {
            continue;
        };
        let base = seen.get(id);
        if base == Some(&*mine) && base != Some(theirs) {
            *mine = theirs.clone();
        }
    }
}

/// A member presence record changed in the replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberStateChange {
    pub member_id: MemberId,
    pub state: MemberState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeletedFilter {
    /// Only sessions without `deletedAt`.
    #[default]
    Exclude,
    /// Only soft-deleted sessions.
    Only,
    Include,
}

/// Filter for [`DocumentStore::query_sessions`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionQuery {
    /// Creator or member id.
    pub participant: Option<String>,
    pub visibility: Option<Visibility>,
    pub join_code: Option<String>,
    pub deleted: DeletedFilter,
    pub exclude_finished: bool,
    pub limit: Option<usize>,
}

impl SessionQuery {
    /// Sessions the user created or belongs to.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            participant: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn public() -> Self {
        Self {
            visibility: Some(Visibility::Public),
            exclude_finished: true,
            ..Self::default()
        }
    }

    pub fn by_join_code(code: impl Into<String>) -> Self {
        Self {
            join_code: Some(code.into()),
            exclude_finished: true,
            limit: Some(1),
            ..Self::default()
        }
    }

    pub fn deleted(mut self, filter: DeletedFilter) -> Self {
        self.deleted = filter;
        self
    }

    pub fn matches(&self, session: &Session) -> bool {
        if let Some(user) = &self.participant {
            if session.creator != *user && !session.has_member(user) {
                return false;
            }
        }
        if let Some(visibility) = self.visibility {
            if session.visibility != visibility {
                return false;
            }
        }
        if let Some(code) = &self.join_code {
            if session.join_code.as_deref() != Some(code.as_str()) {
                return false;
            }
        }
        let deleted_ok = match self.deleted {
            DeletedFilter::Exclude => session.deleted_at.is_none(),
            DeletedFilter::Only => session.deleted_at.is_some(),
            DeletedFilter::Include => true,
        };
        deleted_ok && !(self.exclude_finished && session.finished_at.is_some())
    }

    /// Filter, order by `createdAt` descending and truncate.
    pub fn apply(&self, sessions: impl IntoIterator<Item = Session>) -> Vec<Session> {
        let mut out: Vec<Session> = sessions.into_iter().filter(|s| self.matches(s)).collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}
