//! Keeping the durable record and the realtime replica in step.
//!
//! Mutations clone the current [`SessionState`] into a draft, change the
//! draft, and only replace the live state once [`SessionState::sync`]
//! succeeded. A failed write never counts as committed.
//!
//! Clients write their own presence records straight into the replica, so
//! replica writes merge against the member states last seen in the store
//! instead of overwriting them.

use chrono::Utc;

use super::EngineContext;
use crate::error::{CoreError, Result};
use crate::model::{MemberState, Phase, Session, SessionRealtime};
use crate::storage::MemberStates;
use crate::timer::PhaseSchedule;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SessionState {
    pub session: Session,
    pub realtime: Option<SessionRealtime>,
    /// A phase completed but the automatic restart has not been persisted yet.
    pub restart_pending: bool,
    /// Member states as last read from or written to the replica store.
    seen_members: MemberStates,
}

impl SessionState {
    pub fn new(session: Session, realtime: Option<SessionRealtime>) -> Self {
        let seen_members = realtime
            .as_ref()
            .map(|rt| rt.member_states.clone())
            .unwrap_or_default();
        Self {
            session,
            realtime,
            restart_pending: false,
            seen_members,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.session.is_deleted()
    }

    /// The replica, rebuilt from the durable record if it is missing.
    pub fn realtime_mut(&mut self, schedule: &PhaseSchedule) -> &mut SessionRealtime {
        let session = &self.session;
        self.realtime.get_or_insert_with(|| {
            let mut rt =
                SessionRealtime::for_session(session, Some(schedule.duration_secs(session.status)));
            rt.member_states = session
                .members
                .values()
                .map(|m| (m.id.clone(), MemberState::joined(m)))
                .collect();
            rt
        })
    }

    pub fn time_left(&self) -> Option<u64> {
        self.realtime.as_ref().and_then(|rt| rt.time_left)
    }

    /// Remaining seconds, falling back to the phase's full length when unset.
    pub fn time_left_or_full(&self, schedule: &PhaseSchedule) -> u64 {
        match self.time_left() {
            Some(secs) if secs > 0 => secs,
            _ => schedule.duration_secs(self.session.status),
        }
    }

    pub fn touch(&mut self) {
        self.session.updated_at = Utc::now();
    }

    /// Take a member's record as just read from the replica store.
    pub fn absorb_member(&mut self, member_id: &str, latest: MemberState) {
        self.seen_members
            .insert(member_id.to_string(), latest.clone());
        if let Some(rt) = self.realtime.as_mut() {
            rt.member_states.insert(member_id.to_string(), latest);
        }
    }

    /// Write both documents. The durable and replica writes run concurrently.
    pub async fn sync(&mut self, ctx: &EngineContext) -> Result<()> {
        if let Some(rt) = self.realtime.as_mut() {
            rt.mirror(&self.session);
        }
        let realtime = self.realtime.as_ref();
        let seen = &self.seen_members;
        let (_, written) = tokio::try_join!(ctx.documents.put_session(&self.session), async {
            match realtime {
                Some(rt) => ctx.realtime.put_merged(rt, seen).await.map(Some),
                None => Ok(None),
            }
        })?;
        if let Some(written) = written {
            self.record_written(written);
        }
        Ok(())
    }

    /// Write only the replica, for per-tick `timeLeft` updates.
    pub async fn sync_realtime(&mut self, ctx: &EngineContext) -> Result<()> {
        let Some(rt) = self.realtime.as_mut() else {
            return Ok(());
        };
        rt.mirror(&self.session);
        let written = ctx.realtime.put_merged(rt, &self.seen_members).await?;
        self.record_written(written);
        Ok(())
    }

    fn record_written(&mut self, written: MemberStates) {
        if let Some(rt) = self.realtime.as_mut() {
            rt.member_states = written.clone();
        }
        self.seen_members = written;
    }

    /// Read both documents. `None` unless both exist.
    pub async fn pull(ctx: &EngineContext, id: &str) -> Result<Option<Self>> {
        let (session, realtime) =
            tokio::try_join!(ctx.documents.get_session(id), ctx.realtime.get(id))?;
        Ok(match (session, realtime) {
            (Some(session), Some(realtime)) => Some(Self::new(session, Some(realtime))),
            _ => None,
        })
    }

    /// Read the durable record (required) and the replica (optional).
    pub async fn load(ctx: &EngineContext, id: &str) -> Result<Self> {
        let (session, realtime) =
            tokio::try_join!(ctx.documents.get_session(id), ctx.realtime.get(id))?;
        let session = session.ok_or_else(|| CoreError::not_found("Session", id))?;
        // A replica left behind by a deleted session is ignored.
        let realtime = realtime.filter(|_| !session.is_deleted());
        Ok(Self::new(session, realtime))
    }

    /// Mark the session terminal.
    pub fn mark_deleted(&mut self) {
        let now = Utc::now();
        self.session.deleted_at = Some(now);
        self.session.finished_at.get_or_insert(now);
        self.session.status = Phase::Finished;
        self.session.timer_state = crate::model::TimerState::Stopped;
        self.session.updated_at = now;
        self.restart_pending = false;
    }
}
