use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use studyroom_core::{
    CreateSession, EngineContext, EngineSettings, Event, ExperienceRewards, LocalVideoRooms,
    MemberStatePatch, MemoryStore, PhaseSchedule, Requester, SessionService, Visibility,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

#[derive(Args)]
pub struct SimulateArgs {
    /// Members joining the session
    #[arg(long, default_value = "2")]
    members: usize,
    /// Stop after this many completed phases
    #[arg(long, default_value = "8")]
    phases: u32,
    /// Work phase length in countdown seconds
    #[arg(long, default_value = "6")]
    work_secs: u64,
    /// Short break length in countdown seconds
    #[arg(long, default_value = "2")]
    break_secs: u64,
    /// Long break length in countdown seconds
    #[arg(long, default_value = "4")]
    long_break_secs: u64,
    /// Wall-clock milliseconds per countdown second
    #[arg(long, default_value = "50")]
    tick_ms: u64,
    /// Disconnect the last member after the first phase
    #[arg(long)]
    drop_member: bool,
}

#[derive(Serialize)]
struct MemberSummary {
    id: String,
    level: u32,
    experience: u64,
    points: u64,
    achievements: Vec<String>,
}

#[derive(Serialize)]
struct SimulationSummary {
    session_id: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    active_count: u32,
    break_count: u32,
    long_break_count: u32,
    member_count: u32,
    members: Vec<MemberSummary>,
}

pub async fn run(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let tick = Duration::from_millis(args.tick_ms.max(1));
    let settings = EngineSettings {
        schedule: PhaseSchedule::from_secs(args.work_secs, args.break_secs, args.long_break_secs)?,
        tick,
        presence_grace: tick * 3,
        self_destruct_grace: tick * 10,
        room_autoclose: Duration::from_secs(300),
    };
    let store = Arc::new(MemoryStore::new());
    let svc = SessionService::new(EngineContext::new(
        store.clone(),
        store,
        Arc::new(LocalVideoRooms::new()),
        settings,
        ExperienceRewards::default(),
    ));
    let mut events = svc.events().subscribe();

    let members: Vec<Requester> = (0..args.members.max(1))
        .map(|i| Requester::new(format!("sim-{i}"), format!("Member {i}")))
        .collect();
    let started_at = Utc::now();
    let snap = svc
        .create(
            &members[0],
            CreateSession {
                name: "Simulation".into(),
                visibility: Visibility::Private,
            },
        )
        .await?;
    let id = snap.session.id;
    for member in &members {
        svc.join(&id, member).await?;
        svc.update_state(&id, member, &MemberStatePatch::connected(true))
            .await?;
    }
    svc.start(&id).await?;
    info!(session_id = %id, members = members.len(), "simulation started");

    let longest = args.work_secs.max(args.long_break_secs) + 1;
    let deadline = tokio::time::sleep(tick * (longest * u64::from(args.phases) + 10) as u32);
    tokio::pin!(deadline);
    let mut completed = 0;
    while completed < args.phases {
        let event = tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => event,
        };
        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };
        println!("{}", serde_json::to_string(&event)?);
        if let Event::PhaseCompleted { .. } = event {
            completed += 1;
            if completed == 1 && args.drop_member && members.len() > 1 {
                if let Some(last) = members.last() {
                    svc.update_state(&id, last, &MemberStatePatch::connected(false))
                        .await?;
                }
            }
        }
    }

    let snap = svc.get(&id).await?;
    svc.pause(&id).await?;
    let mut summaries = Vec::with_capacity(members.len());
    for member in &members {
        let user = svc.get_user(&member.id).await?;
        summaries.push(MemberSummary {
            id: user.id,
            level: user.level,
            experience: user.experience,
            points: user.points,
            achievements: user.achievements.into_keys().collect(),
        });
    }
    let summary = SimulationSummary {
        session_id: id,
        started_at,
        finished_at: Utc::now(),
        active_count: snap.session.active_count,
        break_count: snap.session.break_count,
        long_break_count: snap.session.long_break_count,
        member_count: snap.session.member_count,
        members: summaries,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
