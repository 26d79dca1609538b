//! The per-session state machine.
//!
//! Every public operation takes the session mutex, works on a draft of the
//! state, persists the draft through both stores and only then commits it.
//! Once `deletedAt` is set every mutation is a silent no-op.

use std::sync::{Arc, Weak};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::presence::PresenceTracker;
use super::self_destruct::SelfDestruct;
use super::sync::SessionState;
use super::{countdown_key, presence_key, timer_prefix, EngineContext};
use crate::error::{CoreError, Result, ValidationError};
use crate::events::{DeleteReason, Event};
use crate::model::{
    MemberId, MemberState, MemberStatePatch, Session, SessionMember, SessionRealtime,
    SessionSnapshot, TimerState, Visibility,
};
use crate::timer::{PhaseSchedule, TickOutcome};

/// Longest accepted session name.
pub const MAX_NAME_LEN: usize = 100;

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedMember {
    pub member: SessionMember,
    pub state: MemberState,
}

/// What a presence reconciliation pass repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub replica_rebuilt: bool,
    /// Members that had no presence record.
    pub added: Vec<MemberId>,
    /// Presence records without a durable member.
    pub dropped: Vec<MemberId>,
    /// Disconnected members that got a grace timer.
    pub graces_armed: Vec<MemberId>,
}

pub(super) struct Inner {
    pub id: String,
    pub ctx: Arc<EngineContext>,
    pub state: Mutex<SessionState>,
    pub self_destruct: SelfDestruct,
    pub presence: PresenceTracker,
}

/// Shared handle to one live session. Clones refer to the same session.
#[derive(Clone)]
pub struct SessionHandle {
    pub(super) inner: Arc<Inner>,
}

/// Non-owning handle held by timers and the presence listener.
#[derive(Clone)]
pub(super) struct WeakSessionHandle(Weak<Inner>);

impl WeakSessionHandle {
    pub fn upgrade(&self) -> Option<SessionHandle> {
        self.0.upgrade().map(|inner| SessionHandle { inner })
    }
}

pub(crate) fn validate_name(name: &str) -> std::result::Result<String, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::Empty { field: "name" });
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "name",
            max: MAX_NAME_LEN,
        });
    }
    Ok(name.to_string())
}

impl SessionHandle {
    fn new(ctx: Arc<EngineContext>, state: SessionState) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: state.session.id.clone(),
                ctx,
                state: Mutex::new(state),
                self_destruct: SelfDestruct::new(),
                presence: PresenceTracker::new(),
            }),
        }
    }

    /// Persist a brand-new session and register it.
    pub(crate) async fn create(ctx: &Arc<EngineContext>, session: Session) -> Result<Self> {
        let time_left = ctx.settings.schedule.duration_secs(session.status);
        let realtime = SessionRealtime::for_session(&session, Some(time_left));
        let mut state = SessionState::new(session, Some(realtime));
        state.sync(ctx).await?;

        let (handle, _) = ctx.sessions.insert_or_get(Self::new(ctx.clone(), state));
        info!(session_id = %handle.id(), "session created");
        handle.activate().await;
        Ok(handle)
    }

    /// The registered handle for `id`, loading it from the stores on a miss.
    ///
    /// # Errors
    /// `NotFound` if the session does not exist or is deleted.
    pub(crate) async fn load(ctx: &Arc<EngineContext>, id: &str) -> Result<Self> {
        if let Some(handle) = ctx.sessions.get(id) {
            return Ok(handle);
        }
        let state = SessionState::load(ctx, id).await?;
        if state.is_deleted() {
            return Err(CoreError::not_found("Session", id));
        }
        let (handle, inserted) = ctx.sessions.insert_or_get(Self::new(ctx.clone(), state));
        if inserted {
            info!(session_id = %id, "session loaded");
            handle.activate().await;
        }
        Ok(handle)
    }

    /// Start background work for a freshly registered handle.
    async fn activate(&self) {
        self.start_presence_listener();
        let mut state = self.inner.state.lock().await;
        if state.is_deleted() {
            return;
        }
        if let Err(err) = self.reconcile_locked(&mut state).await {
            warn!(session_id = %self.id(), error = %err, "presence reconciliation failed");
        }
        if state.session.member_count == 0 {
            self.arm_self_destruct();
        }
        if state.session.timer_state == TimerState::Running || state.restart_pending {
            self.arm_countdown();
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub(super) fn ctx(&self) -> &EngineContext {
        &self.inner.ctx
    }

    pub(super) fn schedule(&self) -> &PhaseSchedule {
        &self.inner.ctx.settings.schedule
    }

    pub(super) fn downgrade(&self) -> WeakSessionHandle {
        WeakSessionHandle(Arc::downgrade(&self.inner))
    }

    pub(super) fn emit(&self, event: Event) {
        self.ctx().events.emit(event);
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.lock().await;
        SessionSnapshot {
            session: state.session.clone(),
            realtime: state.realtime.clone(),
        }
    }

    pub async fn session(&self) -> Session {
        self.inner.state.lock().await.session.clone()
    }

    pub async fn is_deleted(&self) -> bool {
        self.inner.state.lock().await.is_deleted()
    }

    /// Replace the in-memory state with what the stores hold.
    ///
    /// Returns `false`, leaving the state untouched, if either document is
    /// missing.
    pub async fn pull(&self) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        match SessionState::pull(self.ctx(), self.id()).await? {
            Some(fresh) => {
                *state = fresh;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ── Membership ───────────────────────────────────────────────────

    /// Add `member` (if absent) and reset their presence record.
    ///
    /// `None` if the session is deleted.
    pub async fn add_member(&self, member: SessionMember) -> Result<Option<JoinedMember>> {
        let mut state = self.inner.state.lock().await;
        if state.is_deleted() {
            return Ok(None);
        }

        let mut draft = state.clone();
        let stored = draft
            .session
            .members
            .entry(member.id.clone())
            .or_insert(member)
            .clone();
        draft.session.member_count = draft.session.members.len() as u32;
        let presence = MemberState::joined(&stored);
        draft
            .realtime_mut(self.schedule())
            .member_states
            .insert(stored.id.clone(), presence.clone());
        draft.touch();
        draft.sync(self.ctx()).await?;
        *state = draft;

        self.inner.presence.set_connected(&stored.id, false);
        self.cancel_presence_grace(&stored.id);
        self.disarm_self_destruct();

        info!(session_id = %self.id(), member_id = %stored.id, "member joined");
        self.emit(Event::MemberJoined {
            session_id: self.id().to_string(),
            member_id: stored.id.clone(),
            member_count: state.session.member_count,
            at: Utc::now(),
        });
        Ok(Some(JoinedMember {
            member: stored,
            state: presence,
        }))
    }

    /// Remove a member from both stores. Returns whether anything changed.
    pub async fn remove_member(&self, member_id: &str) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        self.remove_member_locked(&mut state, member_id, false).await
    }

    pub(super) async fn remove_member_locked(
        &self,
        state: &mut SessionState,
        member_id: &str,
        reaped: bool,
    ) -> Result<bool> {
        if state.is_deleted() {
            return Ok(false);
        }

        let mut draft = state.clone();
        let was_member = draft.session.members.remove(member_id).is_some();
        let had_presence = draft
            .realtime
            .as_mut()
            .is_some_and(|rt| rt.member_states.remove(member_id).is_some());
        if !was_member && !had_presence {
            return Ok(false);
        }
        draft.session.member_count = draft.session.members.len() as u32;
        draft.touch();
        draft.sync(self.ctx()).await?;
        *state = draft;

        self.inner.presence.forget(member_id);
        self.ctx().timers.cancel(&presence_key(self.id(), member_id));

        let at = Utc::now();
        if reaped {
            info!(session_id = %self.id(), member_id, "disconnected member removed");
            self.emit(Event::MemberReaped {
                session_id: self.id().to_string(),
                member_id: member_id.to_string(),
                at,
            });
        } else {
            info!(session_id = %self.id(), member_id, "member left");
        }
        self.emit(Event::MemberLeft {
            session_id: self.id().to_string(),
            member_id: member_id.to_string(),
            member_count: state.session.member_count,
            at,
        });

        if state.session.member_count == 0 {
            self.arm_self_destruct();
        }
        Ok(true)
    }

    /// Merge `patch` into a member's presence record.
    ///
    /// `None` if the session is deleted, has no replica, or the member has
    /// no presence record.
    pub async fn update_member_state(
        &self,
        member_id: &str,
        patch: &MemberStatePatch,
    ) -> Result<Option<MemberState>> {
        let mut state = self.inner.state.lock().await;
        if state.is_deleted() {
            return Ok(None);
        }
        let mut draft = state.clone();
        let Some(record) = draft
            .realtime
            .as_mut()
            .and_then(|rt| rt.member_states.get_mut(member_id))
        else {
            return Ok(None);
        };
        record.apply(patch);
        let updated = record.clone();
        draft.touch();
        draft.sync(self.ctx()).await?;
        *state = draft;
        Ok(Some(updated))
    }

    // ── Timer control ────────────────────────────────────────────────

    /// Start or resume the countdown. Returns `false` if it was already
    /// running or the session is deleted.
    pub async fn start_timer(&self) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        if state.is_deleted() || state.session.timer_state == TimerState::Running {
            return Ok(false);
        }

        let mut draft = state.clone();
        let time_left = draft.time_left_or_full(self.schedule());
        draft.session.timer_state = TimerState::Running;
        draft.restart_pending = false;
        draft.realtime_mut(self.schedule()).time_left = Some(time_left);
        draft.touch();
        draft.sync(self.ctx()).await?;
        *state = draft;

        self.arm_countdown();
        info!(session_id = %self.id(), phase = state.session.status.as_str(), time_left, "timer started");
        self.emit(Event::TimerStarted {
            session_id: self.id().to_string(),
            phase: state.session.status,
            time_left,
            at: Utc::now(),
        });
        Ok(true)
    }

    /// Pause the countdown, keeping `timeLeft`. Returns `false` if it was
    /// already paused or the session is deleted.
    pub async fn pause_timer(&self) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        if state.is_deleted() || state.session.timer_state == TimerState::Paused {
            return Ok(false);
        }

        let mut draft = state.clone();
        draft.session.timer_state = TimerState::Paused;
        draft.restart_pending = false;
        draft.touch();
        draft.sync(self.ctx()).await?;
        *state = draft;

        self.ctx().timers.cancel(&countdown_key(self.id()));
        info!(session_id = %self.id(), time_left = ?state.time_left(), "timer paused");
        self.emit(Event::TimerPaused {
            session_id: self.id().to_string(),
            phase: state.session.status,
            time_left: state.time_left(),
            at: Utc::now(),
        });
        Ok(true)
    }

    pub(super) fn arm_countdown(&self) {
        let weak = self.downgrade();
        self.ctx()
            .timers
            .schedule_repeating(countdown_key(self.id()), move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(handle) => handle.tick().await,
                        None => Ok(TickOutcome::Done),
                    }
                }
            });
    }

    // ── Settings & deletion ──────────────────────────────────────────

    /// Rename the session or change its visibility.
    ///
    /// `None` if the session is deleted.
    pub async fn update_settings(
        &self,
        name: Option<&str>,
        visibility: Option<Visibility>,
    ) -> Result<Option<Session>> {
        let name = name.map(validate_name).transpose()?;

        let mut state = self.inner.state.lock().await;
        if state.is_deleted() {
            return Ok(None);
        }
        let mut draft = state.clone();
        if let Some(name) = name {
            draft.session.name = name;
        }
        if let Some(visibility) = visibility {
            draft.session.visibility = visibility;
        }
        draft.touch();
        draft.sync(self.ctx()).await?;
        *state = draft;
        Ok(Some(state.session.clone()))
    }

    /// Delete the session. Returns `false` if it was already deleted.
    ///
    /// The video room is released last; its failure is returned after all
    /// local teardown has happened.
    pub async fn delete(&self) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        self.delete_locked(&mut state, DeleteReason::Requested).await
    }

    pub(super) async fn delete_locked(
        &self,
        state: &mut SessionState,
        reason: DeleteReason,
    ) -> Result<bool> {
        if state.is_deleted() {
            return Ok(false);
        }

        let mut draft = state.clone();
        draft.mark_deleted();
        draft.sync(self.ctx()).await?;
        *state = draft;

        let ctx = self.ctx();
        self.inner.self_destruct.invalidate();
        let cancelled = ctx.timers.cancel_prefix(&timer_prefix(self.id()));
        self.inner.presence.stop_listener();
        ctx.sessions.evict(self.id());
        if let Err(err) = ctx.realtime.delete(self.id()).await {
            warn!(session_id = %self.id(), error = %err, "failed to drop realtime replica");
        }

        info!(session_id = %self.id(), ?reason, timers = cancelled, "session deleted");
        self.emit(Event::SessionDeleted {
            session_id: self.id().to_string(),
            reason,
            at: Utc::now(),
        });

        ctx.rooms.deactivate_room(self.id()).await?;
        Ok(true)
    }

    // ── Presence reconciliation ──────────────────────────────────────

    /// Repair the replica against the durable member list and make sure
    /// every disconnected member has a grace timer.
    pub async fn reconcile_presence(&self) -> Result<ReconcileReport> {
        let mut state = self.inner.state.lock().await;
        self.reconcile_locked(&mut state).await
    }

    pub(super) async fn reconcile_locked(&self, state: &mut SessionState) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        if state.is_deleted() {
            return Ok(report);
        }

        let mut draft = state.clone();
        report.replica_rebuilt = draft.realtime.is_none();
        let members = draft.session.members.clone();
        let rt = draft.realtime_mut(self.schedule());
        for member in members.values() {
            if !rt.member_states.contains_key(&member.id) {
                rt.member_states
                    .insert(member.id.clone(), MemberState::joined(member));
                report.added.push(member.id.clone());
            }
        }
        rt.member_states.retain(|id, _| {
            let keep = members.contains_key(id);
            if !keep {
                report.dropped.push(id.clone());
            }
            keep
        });

        if report.replica_rebuilt || !report.added.is_empty() || !report.dropped.is_empty() {
            draft.sync_realtime(self.ctx()).await?;
            *state = draft;
        }

        if let Some(rt) = state.realtime.as_ref() {
            for (id, member_state) in &rt.member_states {
                self.inner.presence.set_connected(id, member_state.is_connected);
                if !member_state.is_connected
                    && !self.ctx().timers.is_armed(&presence_key(self.id(), id))
                {
                    self.arm_presence_grace(id);
                    report.graces_armed.push(id.clone());
                }
            }
        }

        if report != ReconcileReport::default() {
            info!(
                session_id = %self.id(),
                rebuilt = report.replica_rebuilt,
                added = report.added.len(),
                dropped = report.dropped.len(),
                graces = report.graces_armed.len(),
                "presence reconciled"
            );
        }
        Ok(report)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.inner.id).finish()
    }
}
