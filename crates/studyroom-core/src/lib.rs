//! # Studyroom Core Library
//!
//! Lifecycle engine for collaborative study sessions: a shared Pomodoro
//! countdown, live member presence, video-room provisioning and the
//! experience/achievement rewards that hang off them. The CLI binary and
//! any HTTP layer are thin shells over the same library.
//!
//! ## Architecture
//!
//! - **Session engine**: one serialized handle per live session. Every
//!   mutation is drafted, written to the durable and realtime stores, and
//!   only then committed in memory.
//! - **Timers**: a keyed registry of repeating countdowns and one-shot
//!   grace timers, torn down together when a session is deleted.
//! - **Storage**: store contracts with SQLite and in-memory backends, plus
//!   TOML configuration.
//! - **Gamification**: levels, experience and idempotent achievements.
//! - **Video**: room provisioning and participant tokens.
//!
//! ## Key Components
//!
//! - [`SessionService`]: request-facing operations
//! - [`SessionHandle`]: per-session state machine
//! - [`Database`]: SQLite-backed stores
//! - [`Config`]: application configuration management

pub mod error;
pub mod events;
pub mod gamification;
pub mod model;
pub mod service;
pub mod session;
pub mod storage;
pub mod timer;
pub mod video;

pub use error::{ConfigError, CoreError, StoreError, ValidationError, VideoRoomError};
pub use events::{DeleteReason, Event, EventBus};
pub use gamification::{AchievementTrigger, ExperienceRewards, Reward};
pub use model::{
    MemberState, MemberStatePatch, Phase, Requester, Session, SessionMember, SessionRealtime,
    SessionSnapshot, TimerState, User, Visibility,
};
pub use service::{CreateSession, JoinReceipt, SessionService, UpdateSession};
pub use session::{EngineContext, EngineSettings, SessionHandle};
pub use storage::{Config, Database, DocumentStore, MemoryStore, RealtimeStore};
pub use timer::PhaseSchedule;
pub use video::{LocalVideoRooms, VideoRooms};
