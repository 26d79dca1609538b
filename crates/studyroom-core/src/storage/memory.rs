//! In-process implementation of both store contracts.
//!
//! Used by the simulator and tests. Write counters and fault injection make
//! persistence observable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::feed::ChangeFeed;
use super::store::{
    merge_member_states, DocumentStore, MemberStateChange, MemberStates, RealtimeStore, SessionQuery,
};
use crate::error::StoreError;
use crate::model::{MemberState, Session, SessionRealtime, TaskGroup, User};

#[derive(Default)]
struct Documents {
    sessions: HashMap<String, Session>,
    users: HashMap<String, User>,
    task_groups: HashMap<String, TaskGroup>,
}

#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<Documents>,
    realtime: RwLock<HashMap<String, SessionRealtime>>,
    feed: ChangeFeed,
    document_writes: AtomicU64,
    realtime_writes: AtomicU64,
    fail_document_writes: AtomicU32,
    fail_realtime_writes: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful durable writes so far.
    pub fn document_writes(&self) -> u64 {
        self.document_writes.load(Ordering::SeqCst)
    }

    /// Successful replica writes so far.
    pub fn realtime_writes(&self) -> u64 {
        self.realtime_writes.load(Ordering::SeqCst)
    }

    /// Make the next `n` durable writes fail.
    pub fn fail_next_document_writes(&self, n: u32) {
        self.fail_document_writes.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` replica writes fail.
    pub fn fail_next_realtime_writes(&self, n: u32) {
        self.fail_realtime_writes.store(n, Ordering::SeqCst);
    }

    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_document_write(&self) -> Result<(), StoreError> {
        if Self::take_fault(&self.fail_document_writes) {
            return Err(StoreError::Unavailable("injected document write failure".into()));
        }
        self.document_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn check_realtime_write(&self) -> Result<(), StoreError> {
        if Self::take_fault(&self.fail_realtime_writes) {
            return Err(StoreError::Unavailable("injected realtime write failure".into()));
        }
        self.realtime_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn docs(&self) -> Result<RwLockReadGuard<'_, Documents>, StoreError> {
        self.documents.read().map_err(|_| StoreError::Locked)
    }

    fn docs_mut(&self) -> Result<RwLockWriteGuard<'_, Documents>, StoreError> {
        self.documents.write().map_err(|_| StoreError::Locked)
    }

    fn replicas_mut(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, SessionRealtime>>, StoreError> {
        self.realtime.write().map_err(|_| StoreError::Locked)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.docs()?.sessions.get(id).cloned())
    }

    async fn put_session(&self, session: &Session) -> Result<(), StoreError> {
        self.check_document_write()?;
        self.docs_mut()?
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        self.check_document_write()?;
        self.docs_mut()?.sessions.remove(id);
        Ok(())
    }

    async fn query_sessions(&self, query: &SessionQuery) -> Result<Vec<Session>, StoreError> {
        let docs = self.docs()?;
        Ok(query.apply(docs.sessions.values().cloned()))
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.docs()?.users.get(id).cloned())
    }

    async fn put_user(&self, user: &User) -> Result<(), StoreError> {
        self.check_document_write()?;
        self.docs_mut()?.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn put_task_group(&self, group: &TaskGroup) -> Result<(), StoreError> {
        self.check_document_write()?;
        self.docs_mut()?
            .task_groups
            .insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn task_groups_by_creator(&self, creator: &str) -> Result<Vec<TaskGroup>, StoreError> {
        let docs = self.docs()?;
        let mut groups: Vec<TaskGroup> = docs
            .task_groups
            .values()
            .filter(|g| g.creator == creator)
            .cloned()
            .collect();
        groups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(groups)
    }
}

#[async_trait]
impl RealtimeStore for MemoryStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionRealtime>, StoreError> {
        let replicas = self.realtime.read().map_err(|_| StoreError::Locked)?;
        Ok(replicas.get(session_id).cloned())
    }

    async fn put(&self, realtime: &SessionRealtime) -> Result<(), StoreError> {
        self.check_realtime_write()?;
        let previous = self
            .replicas_mut()?
            .insert(realtime.id.clone(), realtime.clone());
        if let Some(previous) = previous {
            self.feed
                .publish_diff(&realtime.id, &previous.member_states, &realtime.member_states);
        }
        Ok(())
    }

    async fn put_merged(
        &self,
        realtime: &SessionRealtime,
        seen: &MemberStates,
    ) -> Result<MemberStates, StoreError> {
        self.check_realtime_write()?;
        let mut merged = realtime.clone();
        let previous = {
            let mut replicas = self.replicas_mut()?;
            if let Some(stored) = replicas.get(&merged.id) {
                merge_member_states(&mut merged.member_states, &stored.member_states, seen);
            }
            replicas.insert(merged.id.clone(), merged.clone())
        };
        if let Some(previous) = previous {
            self.feed
                .publish_diff(&merged.id, &previous.member_states, &merged.member_states);
        }
        Ok(merged.member_states)
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.check_realtime_write()?;
        self.replicas_mut()?.remove(session_id);
        self.feed.close(session_id);
        Ok(())
    }

    async fn put_member_state(
        &self,
        session_id: &str,
        state: &MemberState,
    ) -> Result<bool, StoreError> {
        self.check_realtime_write()?;
        let (before, after) = {
            let mut replicas = self.replicas_mut()?;
            let Some(replica) = replicas.get_mut(session_id) else {
                return Ok(false);
            };
            let before = replica.member_states.clone();
            replica.member_states.insert(state.id.clone(), state.clone());
            (before, replica.member_states.clone())
        };
        self.feed.publish_diff(session_id, &before, &after);
        Ok(true)
    }

    fn subscribe(&self, session_id: &str) -> broadcast::Receiver<MemberStateChange> {
        self.feed.subscribe(session_id)
    }
}
