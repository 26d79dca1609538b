//! Persistence and membership-count invariants.

use std::sync::Arc;

use proptest::prelude::*;
use studyroom_core::{
    CreateSession, Database, EngineContext, EngineSettings, ExperienceRewards, LocalVideoRooms,
    MemoryStore, RealtimeStore, Requester, SessionService, Visibility,
};

fn service_over(store: Arc<Database>) -> SessionService {
    SessionService::new(EngineContext::new(
        store.clone(),
        store,
        Arc::new(LocalVideoRooms::new()),
        EngineSettings::default(),
        ExperienceRewards::default(),
    ))
}

#[tokio::test(start_paused = true)]
async fn test_sessions_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("studyroom.db");
    let ada = Requester::new("ada", "Ada");

    let id = {
        let svc = service_over(Arc::new(Database::open_at(&path).unwrap()));
        let id = svc
            .create(
                &ada,
                CreateSession {
                    name: "Organic Chemistry".into(),
                    visibility: Visibility::Public,
                },
            )
            .await
            .unwrap()
            .session
            .id;
        svc.join(&id, &ada).await.unwrap();
        svc.start(&id).await.unwrap();
        id
    };

    let db = Arc::new(Database::open_at(&path).unwrap());
    let svc = service_over(db.clone());
    let snap = svc.get(&id).await.unwrap();
    assert_eq!(snap.session.name, "Organic Chemistry");
    assert_eq!(snap.session.member_count, 1);
    assert!(snap.session.has_member("ada"));
    assert!(db.get(&id).await.unwrap().is_some());

    let listed = svc.list_public().await.unwrap();
    assert_eq!(listed.len(), 1);
    let code = snap.session.join_code.clone().unwrap();
    assert_eq!(svc.resolve_join_code(&code).await.unwrap().session.id, id);

    let user = svc.get_user("ada").await.unwrap();
    assert!(user.has_achievement("SESSION_STARTER"));
}

#[derive(Debug, Clone)]
enum Op {
    Join(usize),
    Leave(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(0..4usize).prop_map(Op::Join), (0..4usize).prop_map(Op::Leave)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn member_count_tracks_members(ops in prop::collection::vec(op(), 1..20)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        rt.block_on(async {
            let store = Arc::new(MemoryStore::new());
            let svc = SessionService::new(EngineContext::new(
                store.clone(),
                store.clone(),
                Arc::new(LocalVideoRooms::new()),
                EngineSettings::default(),
                ExperienceRewards::default(),
            ));
            let users: Vec<Requester> = (0..4)
                .map(|i| Requester::new(format!("user-{i}"), format!("User {i}")))
                .collect();
            // The clock never advances, so an empty session is never reaped.
            let id = svc
                .create(
                    &users[0],
                    CreateSession {
                        name: "Property".into(),
                        visibility: Visibility::Private,
                    },
                )
                .await
                .unwrap()
                .session
                .id;

            for op in ops {
                let snap = match op {
                    Op::Join(i) => svc.join(&id, &users[i]).await.unwrap().session,
                    Op::Leave(i) => svc.leave(&id, &users[i]).await.unwrap(),
                };
                assert_eq!(snap.session.member_count as usize, snap.session.members.len());
                let replica = snap.realtime.unwrap();
                let mut replica_ids: Vec<_> = replica.member_states.keys().cloned().collect();
                let mut member_ids: Vec<_> = snap.session.members.keys().cloned().collect();
                replica_ids.sort();
                member_ids.sort();
                assert_eq!(replica_ids, member_ids);
            }
        });
    }
}
