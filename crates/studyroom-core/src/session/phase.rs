//! Countdown ticks and phase completion.
//!
//! The countdown is one repeating timer per session. When a phase runs
//! out the same timer keeps going with the next phase's duration, so the
//! cycle continues without anyone pressing start.

use chrono::Utc;
use tracing::{debug, info, warn};

use super::machine::SessionHandle;
use super::sync::SessionState;
use crate::error::Result;
use crate::events::Event;
use crate::gamification::Reward;
use crate::model::{MemberId, Phase, TimerState};
use crate::timer::{next_phase, TickOutcome};

impl SessionHandle {
    /// One countdown second.
    pub(super) async fn tick(&self) -> Result<TickOutcome> {
        let mut state = self.inner.state.lock().await;
        if state.is_deleted() {
            return Ok(TickOutcome::Done);
        }
        if state.restart_pending {
            return self.restart_locked(&mut state).await;
        }
        if state.session.timer_state != TimerState::Running {
            return Ok(TickOutcome::Done);
        }

        let remaining = state.time_left_or_full(self.schedule()).saturating_sub(1);
        if remaining > 0 {
            let mut draft = state.clone();
            draft.realtime_mut(self.schedule()).time_left = Some(remaining);
            draft.sync_realtime(self.ctx()).await?;
            *state = draft;
            debug!(session_id = %self.id(), remaining, "tick");
            return Ok(TickOutcome::Continue);
        }

        self.complete_phase_locked(&mut state).await
    }

    /// Close the current phase, pay out, and roll into the next one.
    async fn complete_phase_locked(&self, state: &mut SessionState) -> Result<TickOutcome> {
        let completed = state.session.status;
        let recipients: Vec<MemberId> = state
            .realtime
            .as_ref()
            .map(|rt| rt.member_states.keys().cloned().collect())
            .unwrap_or_default();

        let mut draft = state.clone();
        match completed {
            Phase::Active => draft.session.active_count += 1,
            Phase::Break => draft.session.break_count += 1,
            Phase::LongBreak => draft.session.long_break_count += 1,
            Phase::Finished => return Ok(TickOutcome::Done),
        }
        let next = next_phase(completed, draft.session.active_count);
        draft.session.status = next;
        draft.session.timer_state = TimerState::Stopped;
        draft.restart_pending = true;
        draft.realtime_mut(self.schedule()).time_left = Some(self.schedule().duration_secs(next));
        draft.touch();
        draft.sync(self.ctx()).await?;
        *state = draft;

        info!(
            session_id = %self.id(),
            completed = completed.as_str(),
            next = next.as_str(),
            active_count = state.session.active_count,
            "phase completed"
        );
        self.emit(Event::PhaseCompleted {
            session_id: self.id().to_string(),
            completed,
            next,
            active_count: state.session.active_count,
            at: Utc::now(),
        });

        let reward = if completed == Phase::Active {
            Reward::Work
        } else {
            Reward::Break
        };
        self.grant_phase_rewards(&recipients, reward).await;

        self.restart_locked(state).await
    }

    /// Each member is paid at most once per completed phase; a failed
    /// grant is logged and skipped.
    async fn grant_phase_rewards(&self, recipients: &[MemberId], reward: Reward) {
        let ctx = self.ctx();
        let amount = ctx.ledger.rewards().amount(reward);
        for member_id in recipients {
            match ctx.ledger.award(member_id, reward).await {
                Ok(progress) => self.emit(Event::ExperienceGranted {
                    session_id: self.id().to_string(),
                    user_id: member_id.clone(),
                    amount,
                    level: progress.level,
                    levels_gained: progress.levels_gained,
                    at: Utc::now(),
                }),
                Err(err) => warn!(
                    session_id = %self.id(),
                    member_id = %member_id,
                    error = %err,
                    "experience grant failed"
                ),
            }
        }
    }

    /// Put the timer back into `running` after a completed phase.
    async fn restart_locked(&self, state: &mut SessionState) -> Result<TickOutcome> {
        let mut draft = state.clone();
        draft.session.timer_state = TimerState::Running;
        draft.restart_pending = false;
        draft.touch();
        draft.sync(self.ctx()).await?;
        *state = draft;

        let time_left = state.time_left_or_full(self.schedule());
        self.emit(Event::TimerStarted {
            session_id: self.id().to_string(),
            phase: state.session.status,
            time_left,
            at: Utc::now(),
        });
        Ok(TickOutcome::Continue)
    }
}
