//! Session records: the durable document and its realtime replica.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub type SessionId = String;
pub type MemberId = String;

/// Pomodoro phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Active,
    Break,
    LongBreak,
    Finished,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Active => "active",
            Phase::Break => "break",
            Phase::LongBreak => "long-break",
            Phase::Finished => "finished",
        }
    }
}

/// Countdown control, independent of [`Phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerState {
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl std::str::FromStr for Visibility {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(ValidationError::InvalidValue {
                field: "visibility",
                message: format!("expected 'public' or 'private', got '{other}'"),
            }),
        }
    }
}

/// Profile snapshot stored in the durable membership map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMember {
    pub id: MemberId,
    pub name: String,
    #[serde(default)]
    pub profile_pict: Option<String>,
}

/// Durable session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub creator: String,
    pub visibility: Visibility,
    #[serde(default)]
    pub join_code: Option<String>,

    pub status: Phase,
    pub timer_state: TimerState,

    pub active_count: u32,
    pub break_count: u32,
    pub long_break_count: u32,

    pub member_count: u32,
    #[serde(default)]
    pub members: HashMap<MemberId, SessionMember>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Visible to listings, joins and join-code lookups.
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none() && self.finished_at.is_none()
    }

    pub fn has_member(&self, member_id: &str) -> bool {
        self.members.contains_key(member_id)
    }
}

/// Live presence and media flags for one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberState {
    pub id: MemberId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub profile_pict: Option<String>,
    pub is_speaking: bool,
    pub is_muted: bool,
    pub is_deafened: bool,
    pub is_connected: bool,
    pub is_screen_sharing: bool,
    pub is_hand_raised: bool,
    #[serde(default)]
    pub is_camera_enabled: bool,
}

impl MemberState {
    /// Fresh record for a member who just joined: muted, camera off,
    /// not yet connected.
    pub fn joined(member: &SessionMember) -> Self {
        Self {
            id: member.id.clone(),
            name: member.name.clone(),
            profile_pict: member.profile_pict.clone(),
            is_speaking: false,
            is_muted: true,
            is_deafened: false,
            is_connected: false,
            is_screen_sharing: false,
            is_hand_raised: false,
            is_camera_enabled: false,
        }
    }

    pub fn apply(&mut self, patch: &MemberStatePatch) {
        if let Some(v) = patch.is_speaking {
            self.is_speaking = v;
        }
        if let Some(v) = patch.is_muted {
            self.is_muted = v;
        }
        if let Some(v) = patch.is_deafened {
            self.is_deafened = v;
        }
        if let Some(v) = patch.is_connected {
            self.is_connected = v;
        }
        if let Some(v) = patch.is_screen_sharing {
            self.is_screen_sharing = v;
        }
        if let Some(v) = patch.is_hand_raised {
            self.is_hand_raised = v;
        }
        if let Some(v) = patch.is_camera_enabled {
            self.is_camera_enabled = v;
        }
    }
}

/// Partial presence update; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_speaking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_deafened: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_screen_sharing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_hand_raised: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_camera_enabled: Option<bool>,
}

impl MemberStatePatch {
    pub fn connected(is_connected: bool) -> Self {
        Self {
            is_connected: Some(is_connected),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Realtime replica of a session, rebuilt from [`Session`] plus live presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRealtime {
    pub id: SessionId,
    pub creator: String,
    pub status: Phase,
    pub timer_state: TimerState,
    pub active_count: u32,
    pub break_count: u32,
    pub long_break_count: u32,
    /// Seconds left in the current phase. Never stored durably.
    #[serde(default)]
    pub time_left: Option<u64>,
    #[serde(default)]
    pub member_states: HashMap<MemberId, MemberState>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SessionRealtime {
    pub fn for_session(session: &Session, time_left: Option<u64>) -> Self {
        Self {
            id: session.id.clone(),
            creator: session.creator.clone(),
            status: session.status,
            timer_state: session.timer_state,
            active_count: session.active_count,
            break_count: session.break_count,
            long_break_count: session.long_break_count,
            time_left,
            member_states: HashMap::new(),
            created_at: session.created_at,
            deleted_at: session.deleted_at,
        }
    }

    /// Copy the mirrored durable fields from `session`.
    pub fn mirror(&mut self, session: &Session) {
        self.status = session.status;
        self.timer_state = session.timer_state;
        self.active_count = session.active_count;
        self.break_count = session.break_count;
        self.long_break_count = session.long_break_count;
        self.deleted_at = session.deleted_at;
    }
}

/// Session plus its replica, as handed back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub session: Session,
    pub realtime: Option<SessionRealtime>,
}

impl SessionSnapshot {
    pub fn time_left(&self) -> Option<u64> {
        self.realtime.as_ref().and_then(|rt| rt.time_left)
    }
}
