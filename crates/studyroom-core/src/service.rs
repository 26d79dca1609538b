//! Typed operations for the HTTP layer.
//!
//! Callers pass an already-authenticated [`Requester`]. Every operation
//! returns either the updated session-shaped record or a [`CoreError`]
//! whose `status_code()` and `public_message()` the routing layer can
//! hand straight to the client.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result, ValidationError};
use crate::events::{Event, EventBus};
use crate::gamification::{AchievementTrigger, Reward};
use crate::model::{
    MemberState, MemberStatePatch, Phase, Requester, Session, SessionMember, SessionSnapshot,
    TimerState, User, Visibility,
};
use crate::session::{validate_name, EngineContext, SessionHandle};
use crate::storage::{Config, DeletedFilter, DocumentStore, RealtimeStore, SessionQuery};

/// Digits in a join code.
pub const JOIN_CODE_LEN: u32 = 6;
/// Attempts at finding a join code no live session uses.
const JOIN_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSession {
    pub name: String,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSession {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
}

/// Everything a client needs to enter the session's room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinReceipt {
    pub token: String,
    pub room_id: String,
    pub state: MemberState,
    pub session: SessionSnapshot,
}

/// Session factory and request-facing operations.
#[derive(Clone)]
pub struct SessionService {
    ctx: Arc<EngineContext>,
}

impl SessionService {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Wire an engine from configuration over the given stores.
    ///
    /// # Errors
    /// Returns a configuration error if timing or video settings are invalid.
    pub fn from_config(
        config: &Config,
        documents: Arc<dyn DocumentStore>,
        realtime: Arc<dyn RealtimeStore>,
    ) -> Result<Self> {
        let settings = config.engine_settings()?;
        let rooms = crate::video::from_config(&config.video)?;
        Ok(Self::new(EngineContext::new(
            documents,
            realtime,
            rooms,
            settings,
            config.rewards(),
        )))
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    /// Live handle for `id`.
    ///
    /// # Errors
    /// `NotFound` if the session does not exist or is deleted.
    pub async fn handle(&self, id: &str) -> Result<SessionHandle> {
        SessionHandle::load(&self.ctx, id).await
    }

    // ── Users ────────────────────────────────────────────────────────

    /// The requester's profile, created on first sight.
    pub async fn ensure_user(&self, requester: &Requester) -> Result<User> {
        if let Some(user) = self.ctx.documents.get_user(&requester.id).await? {
            if user.deleted_at.is_some() {
                return Err(CoreError::Unauthorized(format!(
                    "user {} is deleted",
                    requester.id
                )));
            }
            return Ok(user);
        }
        let mut user = User::new(requester.id.clone(), requester.name.clone());
        user.profile_pict = requester.profile_pict.clone();
        self.ctx.documents.put_user(&user).await?;
        info!(user_id = %user.id, "user profile created");
        Ok(user)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<User> {
        self.ctx
            .documents
            .get_user(user_id)
            .await?
            .filter(|u| u.deleted_at.is_none())
            .ok_or_else(|| CoreError::not_found("User", user_id))
    }

    /// Evaluate achievements for an external trigger (task-group events).
    pub async fn trigger_achievements(
        &self,
        user_id: &str,
        trigger: &AchievementTrigger,
    ) -> Result<Vec<String>> {
        let granted = self.ctx.achievements.trigger(user_id, trigger).await?;
        if !granted.is_empty() {
            self.ctx.events.emit(Event::AchievementsGranted {
                user_id: user_id.to_string(),
                names: granted.clone(),
                at: Utc::now(),
            });
        }
        Ok(granted)
    }

    async fn trigger_achievements_logged(&self, user_id: &str, trigger: AchievementTrigger) {
        if let Err(err) = self.trigger_achievements(user_id, &trigger).await {
            warn!(user_id, error = %err, "achievement evaluation failed");
        }
    }

    // ── Factory & lookups ────────────────────────────────────────────

    /// Create a session owned by the requester.
    ///
    /// The session starts in `active` with a stopped timer and no members,
    /// so the self-destruct timer is armed immediately.
    pub async fn create(&self, requester: &Requester, input: CreateSession) -> Result<SessionSnapshot> {
        let name = validate_name(&input.name)?;
        self.ensure_user(requester).await?;

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().simple().to_string(),
            name,
            creator: requester.id.clone(),
            visibility: input.visibility,
            join_code: Some(self.generate_join_code().await?),
            status: Phase::Active,
            timer_state: TimerState::Stopped,
            active_count: 0,
            break_count: 0,
            long_break_count: 0,
            member_count: 0,
            members: Default::default(),
            created_at: now,
            updated_at: now,
            finished_at: None,
            deleted_at: None,
        };

        let handle = SessionHandle::create(&self.ctx, session).await?;
        let snapshot = handle.snapshot().await;
        self.ctx.events.emit(Event::SessionCreated {
            session_id: snapshot.session.id.clone(),
            creator: requester.id.clone(),
            at: now,
        });
        self.trigger_achievements_logged(
            &requester.id,
            AchievementTrigger::SessionCreated {
                session: snapshot.session.clone(),
            },
        )
        .await;
        Ok(snapshot)
    }

    /// A random code, retried a few times against live sessions.
    async fn generate_join_code(&self) -> Result<String> {
        let low = 10u32.pow(JOIN_CODE_LEN - 1);
        let high = 10u32.pow(JOIN_CODE_LEN) - 1;
        let mut attempt = 1;
        loop {
            let code = rand::thread_rng().gen_range(low..=high).to_string();
            let taken = self
                .ctx
                .documents
                .query_sessions(&SessionQuery::by_join_code(code.clone()))
                .await?;
            if taken.is_empty() {
                return Ok(code);
            }
            if attempt == JOIN_CODE_ATTEMPTS {
                warn!(attempt, "join code still collides, using it anyway");
                return Ok(code);
            }
            warn!(attempt, "join code collision, retrying");
            attempt += 1;
        }
    }

    pub async fn get(&self, id: &str) -> Result<SessionSnapshot> {
        Ok(self.handle(id).await?.snapshot().await)
    }

    /// The live session using `code`.
    pub async fn resolve_join_code(&self, code: &str) -> Result<SessionSnapshot> {
        let code = code.trim();
        if code.len() != JOIN_CODE_LEN as usize || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::InvalidValue {
                field: "joinCode",
                message: format!("must be {JOIN_CODE_LEN} digits"),
            }
            .into());
        }
        let found = self
            .ctx
            .documents
            .query_sessions(&SessionQuery::by_join_code(code))
            .await?;
        let session = found
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::not_found("Session", code))?;
        self.get(&session.id).await
    }

    /// Sessions the user created or joined, newest first.
    ///
    /// With `only_deleted`, the user's deleted sessions instead.
    pub async fn list_for_user(&self, user_id: &str, only_deleted: bool) -> Result<Vec<Session>> {
        let mut query = SessionQuery::for_user(user_id);
        if only_deleted {
            query = query.deleted(DeletedFilter::Only);
        } else {
            query.exclude_finished = true;
        }
        Ok(self.ctx.documents.query_sessions(&query).await?)
    }

    pub async fn list_public(&self) -> Result<Vec<Session>> {
        Ok(self
            .ctx
            .documents
            .query_sessions(&SessionQuery::public())
            .await?)
    }

    // ── Membership ───────────────────────────────────────────────────

    /// Join the session's room and become a member.
    ///
    /// The creator may enter the room directly; everyone else waits in the
    /// lobby until admitted.
    pub async fn join(&self, session_id: &str, requester: &Requester) -> Result<JoinReceipt> {
        let handle = self.handle(session_id).await?;
        self.ensure_user(requester).await?;
        let session = handle.session().await;

        let ctx = &self.ctx;
        ctx.rooms
            .create_room(session_id, ctx.settings.room_autoclose)
            .await?;
        let token = ctx
            .rooms
            .issue_token(session_id, &requester.id, session.creator == requester.id)
            .await?;

        let member = SessionMember {
            id: requester.id.clone(),
            name: requester.name.clone(),
            profile_pict: requester.profile_pict.clone(),
        };
        let joined = handle
            .add_member(member)
            .await?
            .ok_or_else(|| CoreError::not_found("Session", session_id))?;

        match ctx.ledger.award(&requester.id, Reward::Join).await {
            Ok(progress) => ctx.events.emit(Event::ExperienceGranted {
                session_id: session_id.to_string(),
                user_id: requester.id.clone(),
                amount: ctx.ledger.rewards().amount(Reward::Join),
                level: progress.level,
                levels_gained: progress.levels_gained,
                at: Utc::now(),
            }),
            Err(err) => warn!(user_id = %requester.id, error = %err, "join experience grant failed"),
        }

        let snapshot = handle.snapshot().await;
        self.trigger_achievements_logged(
            &requester.id,
            AchievementTrigger::SessionJoined {
                session: snapshot.session.clone(),
            },
        )
        .await;

        Ok(JoinReceipt {
            token,
            room_id: session_id.to_string(),
            state: joined.state,
            session: snapshot,
        })
    }

    pub async fn leave(&self, session_id: &str, requester: &Requester) -> Result<SessionSnapshot> {
        let handle = self.handle(session_id).await?;
        handle.remove_member(&requester.id).await?;
        Ok(handle.snapshot().await)
    }

    /// Merge a presence patch into the requester's record.
    pub async fn update_state(
        &self,
        session_id: &str,
        requester: &Requester,
        patch: &MemberStatePatch,
    ) -> Result<MemberState> {
        if patch.is_empty() {
            return Err(ValidationError::Empty { field: "state" }.into());
        }
        self.handle(session_id)
            .await?
            .update_member_state(&requester.id, patch)
            .await?
            .ok_or_else(|| {
                ValidationError::InvalidValue {
                    field: "member",
                    message: "request cannot be fulfilled: not a member of this session".into(),
                }
                .into()
            })
    }

    // ── Timer ────────────────────────────────────────────────────────

    pub async fn start(&self, session_id: &str) -> Result<SessionSnapshot> {
        let handle = self.handle(session_id).await?;
        handle.start_timer().await?;
        Ok(handle.snapshot().await)
    }

    pub async fn pause(&self, session_id: &str) -> Result<SessionSnapshot> {
        let handle = self.handle(session_id).await?;
        handle.pause_timer().await?;
        Ok(handle.snapshot().await)
    }

    // ── Settings & deletion ──────────────────────────────────────────

    /// Rename or change visibility. Creator only.
    pub async fn update_settings(
        &self,
        session_id: &str,
        requester: &Requester,
        input: UpdateSession,
    ) -> Result<SessionSnapshot> {
        let handle = self.handle(session_id).await?;
        Self::require_creator(&handle.session().await, requester)?;
        handle
            .update_settings(input.name.as_deref(), input.visibility)
            .await?
            .ok_or_else(|| CoreError::not_found("Session", session_id))?;
        Ok(handle.snapshot().await)
    }

    /// Delete the session. Creator only.
    pub async fn delete(&self, session_id: &str, requester: &Requester) -> Result<()> {
        let handle = self.handle(session_id).await?;
        Self::require_creator(&handle.session().await, requester)?;
        handle.delete().await?;
        Ok(())
    }

    fn require_creator(session: &Session, requester: &Requester) -> Result<()> {
        if session.creator != requester.id {
            return Err(CoreError::Unauthorized(format!(
                "only the creator can modify session {}",
                session.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::EngineSettings;
    use crate::storage::MemoryStore;
    use crate::video::{LocalVideoRooms, TokenSigner};

    fn service() -> (SessionService, Arc<MemoryStore>, Arc<LocalVideoRooms>) {
        let store = Arc::new(MemoryStore::new());
        let rooms = Arc::new(LocalVideoRooms::new());
        let ctx = EngineContext::new(
            store.clone(),
            store.clone(),
            rooms.clone(),
            EngineSettings::default(),
            Default::default(),
        );
        (SessionService::new(ctx), store, rooms)
    }

    fn create_input(name: &str) -> CreateSession {
        CreateSession {
            name: name.into(),
            visibility: Visibility::Public,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn create_assigns_six_digit_join_code() {
        let (svc, _, _) = service();
        let ada = Requester::new("ada", "Ada");
        let snap = svc.create(&ada, create_input("  Algebra  ")).await.unwrap();

        assert_eq!(snap.session.name, "Algebra");
        assert_eq!(snap.session.id.len(), 32);
        let code = snap.session.join_code.clone().unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(snap.session.status, Phase::Active);
        assert_eq!(snap.session.timer_state, TimerState::Stopped);

        let resolved = svc.resolve_join_code(&code).await.unwrap();
        assert_eq!(resolved.session.id, snap.session.id);
    }

    #[tokio::test(start_paused = true)]
    async fn create_rejects_blank_name() {
        let (svc, store, _) = service();
        let err = svc
            .create(&Requester::new("ada", "Ada"), create_input("   "))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(store.document_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn create_grants_starter_achievements() {
        let (svc, _, _) = service();
        let ada = Requester::new("ada", "Ada");
        svc.create(&ada, create_input("Algebra")).await.unwrap();

        let user = svc.get_user("ada").await.unwrap();
        assert!(user.has_achievement("SESSION_STARTER"));
    }

    #[tokio::test(start_paused = true)]
    async fn only_creator_enters_room_directly() {
        let (svc, _, rooms) = service();
        let ada = Requester::new("ada", "Ada");
        let bob = Requester::new("bob", "Bob");
        let snap = svc.create(&ada, create_input("Algebra")).await.unwrap();
        let id = snap.session.id.clone();

        let signer = TokenSigner::new("local", "local-secret");
        let ada_join = svc.join(&id, &ada).await.unwrap();
        let bob_join = svc.join(&id, &bob).await.unwrap();

        assert!(rooms.room(&id).unwrap().active);
        let ada_claims = signer.verify(&ada_join.token).unwrap();
        let bob_claims = signer.verify(&bob_join.token).unwrap();
        assert!(ada_claims.permissions.contains(&crate::video::Permission::AllowJoin));
        assert!(!bob_claims.permissions.contains(&crate::video::Permission::AllowJoin));
        assert_eq!(bob_join.session.session.member_count, 2);
        assert!(!bob_join.state.is_connected);

        let bob_user = svc.get_user("bob").await.unwrap();
        assert_eq!(bob_user.level, 1);
        assert_eq!(bob_user.points, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_and_delete_are_creator_only() {
        let (svc, _, _) = service();
        let ada = Requester::new("ada", "Ada");
        let bob = Requester::new("bob", "Bob");
        let id = svc.create(&ada, create_input("Algebra")).await.unwrap().session.id;

        let err = svc
            .update_settings(&id, &bob, UpdateSession {
                name: Some("Hijacked".into()),
                visibility: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
        assert_eq!(svc.delete(&id, &bob).await.unwrap_err().status_code(), 401);

        let renamed = svc
            .update_settings(&id, &ada, UpdateSession {
                name: Some("Calculus".into()),
                visibility: Some(Visibility::Private),
            })
            .await
            .unwrap();
        assert_eq!(renamed.session.name, "Calculus");
        assert!(svc.list_public().await.unwrap().is_empty());

        svc.delete(&id, &ada).await.unwrap();
        assert_eq!(svc.get(&id).await.unwrap_err().status_code(), 404);
        assert_eq!(svc.list_for_user("ada", true).await.unwrap().len(), 1);
        assert!(svc.list_for_user("ada", false).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn update_state_requires_membership_and_fields() {
        let (svc, _, _) = service();
        let ada = Requester::new("ada", "Ada");
        let id = svc.create(&ada, create_input("Algebra")).await.unwrap().session.id;

        let empty = svc.update_state(&id, &ada, &MemberStatePatch::default()).await;
        assert_eq!(empty.unwrap_err().status_code(), 400);
        let outsider = svc.update_state(&id, &ada, &MemberStatePatch::connected(true)).await;
        assert_eq!(outsider.unwrap_err().status_code(), 400);

        svc.join(&id, &ada).await.unwrap();
        let state = svc
            .update_state(&id, &ada, &MemberStatePatch::connected(true))
            .await
            .unwrap();
        assert!(state.is_connected);
        assert!(state.is_muted);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_join_code_is_rejected() {
        let (svc, _, _) = service();
        assert_eq!(svc.resolve_join_code("12ab").await.unwrap_err().status_code(), 400);
        assert_eq!(svc.resolve_join_code("123456").await.unwrap_err().status_code(), 404);
    }
}
