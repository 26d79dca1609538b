pub mod config;
pub mod session;
pub mod simulate;
pub mod user;

use std::sync::Arc;

use studyroom_core::{Config, Database, Requester, SessionService};

pub fn requester(user: &str, name: Option<&str>) -> Requester {
    Requester::new(user, name.unwrap_or(user))
}

/// Engine over the configured SQLite database.
pub fn open_service() -> Result<SessionService, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = Arc::new(Database::open_at(config.database_path()?)?);
    Ok(SessionService::from_config(&config, db.clone(), db)?)
}
