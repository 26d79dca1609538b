//! `studyroom config`: inspect and edit `config.toml`.
//!
//! Sections: `timer` (phase lengths and tick), `presence` and
//! `self_destruct` (grace windows), `experience` (phase and join rewards),
//! `video` (room provider) and `storage` (database location).

use clap::Subcommand;
use serde_json::json;
use studyroom_core::timer::LONG_BREAK_EVERY;
use studyroom_core::{video, Config};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print one value
    Get {
        /// Dot-separated key (e.g. "timer.work_minutes", "presence.grace_secs")
        key: String,
    },
    /// Change one value; rejected if it leaves the engine settings invalid
    Set {
        key: String,
        value: String,
    },
    /// Print the whole config, or one section of it
    List {
        /// "timer", "presence", "self_destruct", "experience", "video" or "storage"
        section: Option<String>,
    },
    /// Validate the config and print the settings the engine would run with
    Check,
    /// Overwrite the config file with defaults
    Reset,
    /// Print the config file location
    Path,
}

pub fn run(action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            match config.get(&key) {
                Some(value) => println!("{value}"),
                None => {
                    eprintln!("unknown key: {key}");
                    std::process::exit(1);
                }
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            println!("{key} = {value}");
        }
        ConfigAction::List { section } => {
            let config = serde_json::to_value(Config::load()?)?;
            let shown = match &section {
                Some(name) => config
                    .get(name)
                    .ok_or_else(|| format!("unknown section: {name}"))?,
                None => &config,
            };
            println!("{}", serde_json::to_string_pretty(shown)?);
        }
        ConfigAction::Check => {
            let config = Config::load()?;
            let settings = config.engine_settings()?;
            video::from_config(&config.video)?;
            let summary = json!({
                "workSecs": settings.schedule.work_secs,
                "shortBreakSecs": settings.schedule.short_break_secs,
                "longBreakSecs": settings.schedule.long_break_secs,
                "longBreakEvery": LONG_BREAK_EVERY,
                "tickMillis": settings.tick.as_millis() as u64,
                "presenceGraceSecs": settings.presence_grace.as_secs(),
                "selfDestructGraceSecs": settings.self_destruct_grace.as_secs(),
                "roomAutocloseSecs": settings.room_autoclose.as_secs(),
                "rewards": {
                    "work": config.experience.work_reward,
                    "break": config.experience.break_reward,
                    "join": config.experience.join_reward,
                },
                "video": if config.video.enabled { "videosdk" } else { "local" },
                "database": config.database_path()?.display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        ConfigAction::Reset => {
            Config::default().save()?;
            println!("config reset to defaults");
        }
        ConfigAction::Path => {
            println!("{}", Config::path()?.display());
        }
    }
    Ok(())
}
