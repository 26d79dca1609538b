//! Per-session broadcast of member presence changes, shared by store backends.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use super::store::MemberStateChange;
use crate::model::{MemberId, MemberState};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
pub struct ChangeFeed {
    channels: Mutex<HashMap<String, broadcast::Sender<MemberStateChange>>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<MemberStateChange> {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Emit one change per member that existed in `before` and differs in `after`.
    ///
    /// Newly added and removed members are not changes.
    pub fn publish_diff(
        &self,
        session_id: &str,
        before: &HashMap<MemberId, MemberState>,
        after: &HashMap<MemberId, MemberState>,
    ) {
        let changes: Vec<MemberStateChange> = after
            .iter()
            .filter(|(id, state)| before.get(*id).is_some_and(|old| old != *state))
            .map(|(id, state)| MemberStateChange {
                member_id: id.clone(),
                state: state.clone(),
            })
            .collect();
        if changes.is_empty() {
            return;
        }

        let channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(tx) = channels.get(session_id) {
            for change in changes {
                // No receivers is fine.
                let _ = tx.send(change);
            }
        }
    }

    /// Drop the channel; subscribers see the stream close.
    pub fn close(&self, session_id: &str) {
        self.channels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionMember;

    fn state(id: &str, connected: bool) -> MemberState {
        let mut s = MemberState::joined(&SessionMember {
            id: id.into(),
            name: id.into(),
            profile_pict: None,
        });
        s.is_connected = connected;
        s
    }

    #[tokio::test]
    async fn only_changed_existing_members_are_published() {
        let feed = ChangeFeed::new();
        let mut rx = feed.subscribe("s1");

        let before = HashMap::from([("a".to_string(), state("a", false)), ("b".to_string(), state("b", true))]);
        let after = HashMap::from([
            ("a".to_string(), state("a", true)),
            ("b".to_string(), state("b", true)),
            ("c".to_string(), state("c", false)),
        ]);
        feed.publish_diff("s1", &before, &after);

        let change = rx.recv().await.unwrap();
        assert_eq!(change.member_id, "a");
        assert!(change.state.is_connected);
        assert!(rx.try_recv().is_err());
    }
}
