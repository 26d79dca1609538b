mod roadmap;
mod session;
mod user;

pub use roadmap::{Task, TaskGroup};
pub use session::{
    MemberId, MemberState, MemberStatePatch, Phase, Session, SessionId, SessionMember,
    SessionRealtime, SessionSnapshot, TimerState, Visibility,
};
pub use user::{Requester, User, UserId};
