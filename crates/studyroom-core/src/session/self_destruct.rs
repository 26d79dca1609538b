//! Reaping sessions nobody is in.
//!
//! Every arm and disarm bumps an epoch. A firing timer only deletes the
//! session if its epoch is still the latest and the session is still empty,
//! so a join that races the timer always wins.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::{debug, info};

use super::machine::SessionHandle;
use super::self_destruct_key;
use crate::error::Result;
use crate::events::{DeleteReason, Event};

pub(super) struct SelfDestruct {
    epoch: AtomicU64,
}

impl SelfDestruct {
    pub fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
        }
    }

    fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Make any in-flight timer stale.
    pub fn invalidate(&self) {
        self.next_epoch();
    }
}

impl SessionHandle {
    pub(super) fn arm_self_destruct(&self) {
        let epoch = self.inner.self_destruct.next_epoch();
        let weak = self.downgrade();
        let grace = self.ctx().settings.self_destruct_grace;
        self.ctx()
            .timers
            .schedule_once(self_destruct_key(self.id()), grace, move || async move {
                match weak.upgrade() {
                    Some(handle) => handle.fire_self_destruct(epoch).await,
                    None => Ok(()),
                }
            });
        info!(session_id = %self.id(), grace_secs = grace.as_secs(), "self-destruct armed");
        self.emit(Event::SelfDestructArmed {
            session_id: self.id().to_string(),
            at: Utc::now(),
        });
    }

    pub(super) fn disarm_self_destruct(&self) {
        self.inner.self_destruct.invalidate();
        let key = self_destruct_key(self.id());
        if !self.ctx().timers.is_armed(&key) {
            return;
        }
        self.ctx().timers.cancel(&key);
        info!(session_id = %self.id(), "self-destruct disarmed");
        self.emit(Event::SelfDestructDisarmed {
            session_id: self.id().to_string(),
            at: Utc::now(),
        });
    }

    async fn fire_self_destruct(&self, epoch: u64) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if !self.inner.self_destruct.is_current(epoch)
            || state.is_deleted()
            || state.session.member_count > 0
        {
            debug!(session_id = %self.id(), epoch, "stale self-destruct ignored");
            return Ok(());
        }
        info!(session_id = %self.id(), "reaping empty session");
        self.delete_locked(&mut state, DeleteReason::SelfDestruct).await?;
        Ok(())
    }
}
