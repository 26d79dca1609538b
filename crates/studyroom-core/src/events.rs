use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::model::{MemberId, Phase, SessionId, UserId};

/// Why a session was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteReason {
    /// The creator asked for it.
    Requested,
    /// Nobody was in the session for the whole grace window.
    SelfDestruct,
}

/// Every state change in the engine produces an Event.
/// The simulator prints them; observers subscribe through [`EventBus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    SessionCreated {
        session_id: SessionId,
        creator: UserId,
        at: DateTime<Utc>,
    },
    MemberJoined {
        session_id: SessionId,
        member_id: MemberId,
        member_count: u32,
        at: DateTime<Utc>,
    },
    MemberLeft {
        session_id: SessionId,
        member_id: MemberId,
        member_count: u32,
        at: DateTime<Utc>,
    },
    /// A disconnected member's grace window elapsed.
    MemberReaped {
        session_id: SessionId,
        member_id: MemberId,
        at: DateTime<Utc>,
    },
    PresenceGraceArmed {
        session_id: SessionId,
        member_id: MemberId,
        at: DateTime<Utc>,
    },
    PresenceGraceCancelled {
        session_id: SessionId,
        member_id: MemberId,
        at: DateTime<Utc>,
    },
    TimerStarted {
        session_id: SessionId,
        phase: Phase,
        time_left: u64,
        at: DateTime<Utc>,
    },
    TimerPaused {
        session_id: SessionId,
        phase: Phase,
        time_left: Option<u64>,
        at: DateTime<Utc>,
    },
    PhaseCompleted {
        session_id: SessionId,
        completed: Phase,
        next: Phase,
        active_count: u32,
        at: DateTime<Utc>,
    },
    ExperienceGranted {
        session_id: SessionId,
        user_id: UserId,
        amount: u64,
        level: u32,
        levels_gained: u32,
        at: DateTime<Utc>,
    },
    AchievementsGranted {
        user_id: UserId,
        names: Vec<String>,
        at: DateTime<Utc>,
    },
    SelfDestructArmed {
        session_id: SessionId,
        at: DateTime<Utc>,
    },
    SelfDestructDisarmed {
        session_id: SessionId,
        at: DateTime<Utc>,
    },
    SessionDeleted {
        session_id: SessionId,
        reason: DeleteReason,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::SessionCreated { .. } => "SessionCreated",
            Event::MemberJoined { .. } => "MemberJoined",
            Event::MemberLeft { .. } => "MemberLeft",
            Event::MemberReaped { .. } => "MemberReaped",
            Event::PresenceGraceArmed { .. } => "PresenceGraceArmed",
            Event::PresenceGraceCancelled { .. } => "PresenceGraceCancelled",
            Event::TimerStarted { .. } => "TimerStarted",
            Event::TimerPaused { .. } => "TimerPaused",
            Event::PhaseCompleted { .. } => "PhaseCompleted",
            Event::ExperienceGranted { .. } => "ExperienceGranted",
            Event::AchievementsGranted { .. } => "AchievementsGranted",
            Event::SelfDestructArmed { .. } => "SelfDestructArmed",
            Event::SelfDestructDisarmed { .. } => "SelfDestructDisarmed",
            Event::SessionDeleted { .. } => "SessionDeleted",
        }
    }
}

const EVENT_CAPACITY: usize = 1024;

/// Fan-out of engine events. Emitting with no subscribers is fine.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: Event) {
        debug!(kind = event.kind(), "engine event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = Event::SessionDeleted {
            session_id: "s1".into(),
            reason: DeleteReason::SelfDestruct,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "SessionDeleted");
        assert_eq!(json["reason"], "self_destruct");
        assert_eq!(event.kind(), "SessionDeleted");
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new();
        bus.emit(Event::SelfDestructArmed {
            session_id: "lost".into(),
            at: Utc::now(),
        });
        let mut rx = bus.subscribe();
        bus.emit(Event::SelfDestructDisarmed {
            session_id: "s1".into(),
            at: Utc::now(),
        });
        assert_eq!(rx.recv().await.unwrap().kind(), "SelfDestructDisarmed");
    }
}
