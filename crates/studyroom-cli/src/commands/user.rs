use clap::Subcommand;
use studyroom_core::{AchievementTrigger, Requester};

use super::open_service;

#[derive(Subcommand)]
pub enum UserAction {
    /// Print a user profile as JSON (defaults to the current user)
    Show {
        /// User id
        id: Option<String>,
    },
    /// Re-evaluate achievements for the current user
    Achievements,
}

pub async fn run(action: UserAction, requester: &Requester) -> Result<(), Box<dyn std::error::Error>> {
    let svc = open_service()?;
    match action {
        UserAction::Show { id } => {
            let user = match id {
                Some(id) => svc.get_user(&id).await?,
                None => svc.ensure_user(requester).await?,
            };
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        UserAction::Achievements => {
            svc.ensure_user(requester).await?;
            let granted = svc
                .trigger_achievements(&requester.id, &AchievementTrigger::Refresh)
                .await?;
            if granted.is_empty() {
                println!("no new achievements");
            } else {
                for name in granted {
                    println!("{name}");
                }
            }
        }
    }
    Ok(())
}
