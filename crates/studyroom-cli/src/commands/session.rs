use std::time::Duration;

use clap::Subcommand;
use studyroom_core::{
    CreateSession, MemberStatePatch, Requester, SessionService, UpdateSession, Visibility,
};

use super::open_service;

#[derive(Subcommand)]
pub enum SessionAction {
    /// Create a session owned by the current user
    Create {
        /// Session name
        name: String,
        /// Hide the session from the public listing
        #[arg(long)]
        private: bool,
    },
    /// List sessions
    List {
        /// Public sessions instead of the current user's
        #[arg(long, conflicts_with = "deleted")]
        public: bool,
        /// The current user's deleted sessions
        #[arg(long)]
        deleted: bool,
    },
    /// Print a session and its realtime replica as JSON
    Show {
        /// Session ID
        id: String,
    },
    /// Look up a session by its join code
    Resolve {
        /// Six-digit join code
        code: String,
    },
    /// Join a session and print the room token
    Join {
        /// Session ID
        id: String,
    },
    /// Leave a session
    Leave {
        /// Session ID
        id: String,
    },
    /// Update the current user's presence flags
    State {
        /// Session ID
        id: String,
        #[arg(long)]
        connected: Option<bool>,
        #[arg(long)]
        muted: Option<bool>,
        #[arg(long)]
        deafened: Option<bool>,
        #[arg(long)]
        speaking: Option<bool>,
        #[arg(long)]
        screen_sharing: Option<bool>,
        #[arg(long)]
        hand_raised: Option<bool>,
        #[arg(long)]
        camera: Option<bool>,
    },
    /// Start or resume the countdown
    Start {
        /// Session ID
        id: String,
    },
    /// Pause the countdown
    Pause {
        /// Session ID
        id: String,
    },
    /// Rename a session or change its visibility (creator only)
    Update {
        /// Session ID
        id: String,
        #[arg(long)]
        name: Option<String>,
        /// "public" or "private"
        #[arg(long)]
        visibility: Option<Visibility>,
    },
    /// Delete a session (creator only)
    Delete {
        /// Session ID
        id: String,
    },
    /// Keep the engine running and print session events as JSON lines
    Watch {
        /// Session ID
        id: String,
        /// Stop after this many seconds
        #[arg(long, default_value = "60")]
        seconds: u64,
    },
}

pub async fn run(
    action: SessionAction,
    requester: &Requester,
) -> Result<(), Box<dyn std::error::Error>> {
    let svc = open_service()?;

    match action {
        SessionAction::Create { name, private } => {
            let visibility = if private {
                Visibility::Private
            } else {
                Visibility::Public
            };
            let snap = svc.create(requester, CreateSession { name, visibility }).await?;
            println!("Session created: {}", snap.session.id);
            if let Some(code) = &snap.session.join_code {
                println!("Join code: {code}");
            }
        }
        SessionAction::List { public, deleted } => {
            let sessions = if public {
                svc.list_public().await?
            } else {
                svc.list_for_user(&requester.id, deleted).await?
            };
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        SessionAction::Show { id } => {
            println!("{}", serde_json::to_string_pretty(&svc.get(&id).await?)?);
        }
        SessionAction::Resolve { code } => {
            let snap = svc.resolve_join_code(&code).await?;
            println!("{}", snap.session.id);
        }
        SessionAction::Join { id } => {
            let receipt = svc.join(&id, requester).await?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
        }
        SessionAction::Leave { id } => {
            let snap = svc.leave(&id, requester).await?;
            println!("Members: {}", snap.session.member_count);
        }
        SessionAction::State {
            id,
            connected,
            muted,
            deafened,
            speaking,
            screen_sharing,
            hand_raised,
            camera,
        } => {
            let patch = MemberStatePatch {
                is_connected: connected,
                is_muted: muted,
                is_deafened: deafened,
                is_speaking: speaking,
                is_screen_sharing: screen_sharing,
                is_hand_raised: hand_raised,
                is_camera_enabled: camera,
            };
            let state = svc.update_state(&id, requester, &patch).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        SessionAction::Start { id } => {
            let snap = svc.start(&id).await?;
            print_timer(&snap);
        }
        SessionAction::Pause { id } => {
            let snap = svc.pause(&id).await?;
            print_timer(&snap);
        }
        SessionAction::Update {
            id,
            name,
            visibility,
        } => {
            let snap = svc
                .update_settings(&id, requester, UpdateSession { name, visibility })
                .await?;
            println!("{}", serde_json::to_string_pretty(&snap.session)?);
        }
        SessionAction::Delete { id } => {
            svc.delete(&id, requester).await?;
            println!("Session deleted: {id}");
        }
        SessionAction::Watch { id, seconds } => watch(&svc, &id, seconds).await?,
    }
    Ok(())
}

fn print_timer(snap: &studyroom_core::SessionSnapshot) {
    println!(
        "{} {:?} ({}s left)",
        snap.session.status.as_str(),
        snap.session.timer_state,
        snap.time_left().unwrap_or(0)
    );
}

async fn watch(
    svc: &SessionService,
    id: &str,
    seconds: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut events = svc.events().subscribe();
    // Loading the session arms its countdown and grace timers.
    svc.get(id).await?;

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}
