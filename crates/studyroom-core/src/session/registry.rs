//! Process-wide map from session id to its live handle.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::machine::SessionHandle;
use crate::model::SessionId;

/// At most one [`SessionHandle`] per id. Deleted sessions are evicted.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
    }

    /// Register `handle` unless another handle for the same id won the race.
    ///
    /// Returns the registered handle and whether it is the one passed in.
    pub fn insert_or_get(&self, handle: SessionHandle) -> (SessionHandle, bool) {
        let mut sessions = self.sessions.write().unwrap_or_else(|p| p.into_inner());
        match sessions.get(handle.id()) {
            Some(existing) => (existing.clone(), false),
            None => {
                sessions.insert(handle.id().to_string(), handle.clone());
                (handle, true)
            }
        }
    }

    pub fn evict(&self, id: &str) -> Option<SessionHandle> {
        self.sessions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
