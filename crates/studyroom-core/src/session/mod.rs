//! Session lifecycle engine.
//!
//! One [`SessionHandle`] per live session id, shared through the
//! [`SessionRegistry`]. Requests, countdown ticks, presence events and the
//! self-destruct timer all go through the handle's mutex.
//!
//! Timer keys used per session:
//! - `{id}:countdown` repeating phase countdown
//! - `{id}:self-destruct` empty-session reaper
//! - `{id}:presence:{member}` disconnect grace window

mod machine;
mod phase;
mod presence;
mod registry;
mod self_destruct;
mod sync;

pub use machine::{JoinedMember, ReconcileReport, SessionHandle, MAX_NAME_LEN};
pub(crate) use machine::validate_name;
pub use registry::SessionRegistry;

use std::sync::Arc;
use std::time::Duration;

use crate::events::EventBus;
use crate::gamification::{
    AchievementRegistry, AchievementService, ExperienceLedger, ExperienceRewards, UserLocks,
};
use crate::storage::{DocumentStore, RealtimeStore};
use crate::timer::{PhaseSchedule, TimerRegistry};
use crate::video::VideoRooms;

/// Timing knobs for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub schedule: PhaseSchedule,
    /// One countdown second.
    pub tick: Duration,
    pub presence_grace: Duration,
    pub self_destruct_grace: Duration,
    pub room_autoclose: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            schedule: PhaseSchedule::default(),
            tick: Duration::from_secs(1),
            presence_grace: Duration::from_secs(300),
            self_destruct_grace: Duration::from_secs(300),
            room_autoclose: Duration::from_secs(300),
        }
    }
}

/// Everything a session needs from the outside world.
pub struct EngineContext {
    pub documents: Arc<dyn DocumentStore>,
    pub realtime: Arc<dyn RealtimeStore>,
    pub rooms: Arc<dyn VideoRooms>,
    pub timers: TimerRegistry,
    pub settings: EngineSettings,
    pub ledger: ExperienceLedger,
    pub achievements: AchievementService,
    pub events: EventBus,
    pub sessions: SessionRegistry,
}

impl EngineContext {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        realtime: Arc<dyn RealtimeStore>,
        rooms: Arc<dyn VideoRooms>,
        settings: EngineSettings,
        rewards: ExperienceRewards,
    ) -> Arc<Self> {
        let locks = UserLocks::default();
        Arc::new(Self {
            ledger: ExperienceLedger::new(documents.clone(), rewards, locks.clone()),
            achievements: AchievementService::new(
                documents.clone(),
                AchievementRegistry::builtin(),
                locks,
            ),
            timers: TimerRegistry::new(settings.tick),
            events: EventBus::new(),
            sessions: SessionRegistry::new(),
            documents,
            realtime,
            rooms,
            settings,
        })
    }
}

pub(crate) fn countdown_key(session_id: &str) -> String {
    format!("{session_id}:countdown")
}

pub(crate) fn self_destruct_key(session_id: &str) -> String {
    format!("{session_id}:self-destruct")
}

pub(crate) fn presence_key(session_id: &str, member_id: &str) -> String {
    format!("{session_id}:presence:{member_id}")
}

/// Prefix shared by every timer of a session.
pub(crate) fn timer_prefix(session_id: &str) -> String {
    format!("{session_id}:")
}
