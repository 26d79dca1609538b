//! Disconnect detection with a grace window.
//!
//! A listener task follows member-state changes in the realtime store.
//! A connected member who drops gets a grace timer; reconnecting cancels
//! it, and if it fires while the member is still disconnected they are
//! removed from the session.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::machine::SessionHandle;
use super::presence_key;
use crate::error::Result;
use crate::events::Event;
use crate::model::MemberId;

/// Listener task plus the last connection flag seen for each member.
pub(super) struct PresenceTracker {
    listener: Mutex<Option<AbortHandle>>,
    connected: Mutex<HashMap<MemberId, bool>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            listener: Mutex::new(None),
            connected: Mutex::new(HashMap::new()),
        }
    }

    /// Record the current flag and return the previous one.
    pub fn set_connected(&self, member_id: &str, connected: bool) -> Option<bool> {
        self.connected
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(member_id.to_string(), connected)
    }

    pub fn forget(&self, member_id: &str) {
        self.connected
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(member_id);
    }

    fn replace_listener(&self, handle: AbortHandle) {
        let previous = self
            .listener
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn stop_listener(&self) {
        let handle = self.listener.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl SessionHandle {
    pub(super) fn start_presence_listener(&self) {
        let mut rx = self.ctx().realtime.subscribe(self.id());
        let weak = self.downgrade();
        let session_id = self.id().to_string();

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        let Some(handle) = weak.upgrade() else { break };
                        if let Err(err) = handle.on_presence_change(&change.member_id).await {
                            warn!(%session_id, member_id = %change.member_id, error = %err, "presence update failed");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%session_id, skipped, "presence listener lagged, reconciling");
                        let Some(handle) = weak.upgrade() else { break };
                        if let Err(err) = handle.reconcile_presence().await {
                            warn!(%session_id, error = %err, "presence reconciliation failed");
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(%session_id, "presence listener stopped");
        });
        self.inner.presence.replace_listener(task.abort_handle());
    }

    /// React to a member's presence record changing in the realtime store.
    ///
    /// The store is re-read so that a stale event never overrides a newer
    /// write.
    pub(super) async fn on_presence_change(&self, member_id: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.is_deleted() || !state.session.has_member(member_id) {
            return Ok(());
        }
        let current = self
            .ctx()
            .realtime
            .get(self.id())
            .await?
            .and_then(|rt| rt.member_states.get(member_id).cloned());
        let Some(current) = current else {
            return Ok(());
        };

        let connected = current.is_connected;
        state.absorb_member(member_id, current);

        let previous = self.inner.presence.set_connected(member_id, connected);
        match (previous, connected) {
            (Some(true), false) => self.arm_presence_grace(member_id),
            (_, true) => self.cancel_presence_grace(member_id),
            _ => {}
        }
        Ok(())
    }

    pub(super) fn arm_presence_grace(&self, member_id: &str) {
        let weak = self.downgrade();
        let member = member_id.to_string();
        let grace = self.ctx().settings.presence_grace;
        self.ctx()
            .timers
            .schedule_once(presence_key(self.id(), member_id), grace, move || async move {
                match weak.upgrade() {
                    Some(handle) => handle.reap_if_disconnected(&member).await,
                    None => Ok(()),
                }
            });
        debug!(session_id = %self.id(), member_id, grace_secs = grace.as_secs(), "presence grace armed");
        self.emit(Event::PresenceGraceArmed {
            session_id: self.id().to_string(),
            member_id: member_id.to_string(),
            at: Utc::now(),
        });
    }

    pub(super) fn cancel_presence_grace(&self, member_id: &str) {
        let key = presence_key(self.id(), member_id);
        if !self.ctx().timers.is_armed(&key) {
            return;
        }
        self.ctx().timers.cancel(&key);
        debug!(session_id = %self.id(), member_id, "presence grace cancelled");
        self.emit(Event::PresenceGraceCancelled {
            session_id: self.id().to_string(),
            member_id: member_id.to_string(),
            at: Utc::now(),
        });
    }

    /// Grace window elapsed: remove the member unless they came back.
    async fn reap_if_disconnected(&self, member_id: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.is_deleted() {
            return Ok(());
        }
        let latest = self
            .ctx()
            .realtime
            .get(self.id())
            .await?
            .and_then(|rt| rt.member_states.get(member_id).cloned());
        let connected = match latest {
            Some(latest) => {
                let connected = latest.is_connected;
                state.absorb_member(member_id, latest);
                connected
            }
            None => false,
        };
        if connected {
            self.inner.presence.set_connected(member_id, true);
            return Ok(());
        }
        self.remove_member_locked(&mut state, member_id, true).await?;
        Ok(())
    }
}
