//! TOML-based engine configuration.
//!
//! Stores operator settings including:
//! - Canonical phase durations and the countdown tick
//! - Presence grace and self-destruct windows
//! - Experience rewards
//! - Video-room provider credentials
//! - Database location
//!
//! Configuration is stored at `~/.config/studyroom/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::data_dir;
use crate::error::ConfigError;
use crate::gamification::ExperienceRewards;
use crate::session::EngineSettings;
use crate::timer::PhaseSchedule;

/// Pomodoro timer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_work_minutes")]
    pub work_minutes: u64,
    #[serde(default = "default_short_break_minutes")]
    pub short_break_minutes: u64,
    #[serde(default = "default_long_break_minutes")]
    pub long_break_minutes: u64,
    /// Countdown tick length. Lower it to run sessions faster than real time.
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

/// Presence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// How long a disconnected member is kept before removal.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

/// Empty-session reaping configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfDestructConfig {
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

/// Experience rewards per event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceConfig {
    #[serde(default = "default_work_reward")]
    pub work_reward: u64,
    #[serde(default = "default_break_reward")]
    pub break_reward: u64,
    #[serde(default = "default_join_reward")]
    pub join_reward: u64,
}

/// Video-room provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Use the hosted provider. When false, rooms are tracked in-process.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_video_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    /// Provider-side auto-close for rooms nobody is in.
    #[serde(default = "default_grace_secs")]
    pub autoclose_secs: u64,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file. Defaults to `studyroom.db` in the data directory.
    #[serde(default)]
    pub database_path: Option<String>,
}

/// Engine configuration.
///
/// Serialized to/from TOML at `~/.config/studyroom/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub self_destruct: SelfDestructConfig,
    #[serde(default)]
    pub experience: ExperienceConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

// Default functions
fn default_work_minutes() -> u64 {
    25
}
fn default_short_break_minutes() -> u64 {
    5
}
fn default_long_break_minutes() -> u64 {
    15
}
fn default_tick_millis() -> u64 {
    1000
}
fn default_grace_secs() -> u64 {
    300
}
fn default_work_reward() -> u64 {
    50
}
fn default_break_reward() -> u64 {
    10
}
fn default_join_reward() -> u64 {
    5
}
fn default_video_base_url() -> String {
    "https://api.videosdk.live/v2".into()
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            work_minutes: default_work_minutes(),
            short_break_minutes: default_short_break_minutes(),
            long_break_minutes: default_long_break_minutes(),
            tick_millis: default_tick_millis(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
        }
    }
}

impl Default for SelfDestructConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
        }
    }
}

impl Default for ExperienceConfig {
    fn default() -> Self {
        Self {
            work_reward: default_work_reward(),
            break_reward: default_break_reward(),
            join_reward: default_join_reward(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_video_base_url(),
            api_key: String::new(),
            api_secret: String::new(),
            autoclose_secs: default_grace_secs(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        if key.is_empty() {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let mut parts = key.split('.').peekable();
        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                current = current
                    .get_mut(part)
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
                continue;
            }

            let obj = current
                .as_object_mut()
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
            let existing = obj
                .get(part)
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

            let new_value = match existing {
                serde_json::Value::Bool(_) => serde_json::Value::Bool(
                    value
                        .parse::<bool>()
                        .map_err(|e| invalid(e.to_string()))?,
                ),
                serde_json::Value::Number(_) => serde_json::Value::Number(
                    value
                        .parse::<u64>()
                        .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?
                        .into(),
                ),
                // Optional strings serialize as null until first set.
                serde_json::Value::Null | serde_json::Value::String(_) => {
                    if value.is_empty() && existing.is_null() {
                        serde_json::Value::Null
                    } else {
                        serde_json::Value::String(value.into())
                    }
                }
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    return Err(invalid("cannot replace a whole section".into()));
                }
            };

            obj.insert(part.to_string(), new_value);
        }
        Ok(())
    }

    /// Path of the config file in the data directory.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be created.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk, writing the default file when none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from an explicit path, writing the default file when none exists.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
        }
    }

    /// Persist to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a value by dot-separated key in memory and re-validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed
    /// or leaves the engine settings invalid. On error `self` is unchanged.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        updated.engine_settings()?;
        *self = updated;
        Ok(())
    }

    /// Set a value and persist to the default location.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.set_value(key, value)?;
        self.save()
    }

    /// Canonical phase durations.
    pub fn schedule(&self) -> Result<PhaseSchedule, ConfigError> {
        PhaseSchedule::from_minutes(
            self.timer.work_minutes,
            self.timer.short_break_minutes,
            self.timer.long_break_minutes,
        )
        .map_err(|e| ConfigError::InvalidValue {
            key: format!("timer.{}_minutes", e.field()),
            message: e.to_string(),
        })
    }

    pub fn rewards(&self) -> ExperienceRewards {
        ExperienceRewards {
            work: self.experience.work_reward,
            rest: self.experience.break_reward,
            join: self.experience.join_reward,
        }
    }

    /// Timing settings for the session engine.
    pub fn engine_settings(&self) -> Result<EngineSettings, ConfigError> {
        if self.timer.tick_millis == 0 {
            return Err(ConfigError::InvalidValue {
                key: "timer.tick_millis".into(),
                message: "tick must be greater than zero".into(),
            });
        }
        Ok(EngineSettings {
            schedule: self.schedule()?,
            tick: Duration::from_millis(self.timer.tick_millis),
            presence_grace: Duration::from_secs(self.presence.grace_secs),
            self_destruct_grace: Duration::from_secs(self.self_destruct.grace_secs),
            room_autoclose: Duration::from_secs(self.video.autoclose_secs),
        })
    }

    /// Database file, honouring `storage.database_path`.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.database_path {
            Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
            _ => Ok(data_dir()?.join("studyroom.db")),
        }
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.timer.work_minutes, 25);
        assert_eq!(parsed.presence.grace_secs, 300);
        assert_eq!(parsed.video.base_url, "https://api.videosdk.live/v2");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: Config = toml::from_str("[timer]\nwork_minutes = 50\n").unwrap();
        assert_eq!(parsed.timer.work_minutes, 50);
        assert_eq!(parsed.timer.short_break_minutes, 5);
        assert_eq!(parsed.experience.join_reward, 5);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("timer.work_minutes").as_deref(), Some("25"));
        assert_eq!(cfg.get("video.enabled").as_deref(), Some("false"));
        assert!(cfg.get("timer.missing_key").is_none());
    }

    #[test]
    fn set_value_updates_nested_fields() {
        let mut cfg = Config::default();
        cfg.set_value("presence.grace_secs", "60").unwrap();
        cfg.set_value("video.enabled", "true").unwrap();
        cfg.set_value("video.api_key", "key-123").unwrap();
        cfg.set_value("storage.database_path", "/tmp/studyroom.db").unwrap();
        assert_eq!(cfg.presence.grace_secs, 60);
        assert!(cfg.video.enabled);
        assert_eq!(cfg.video.api_key, "key-123");
        assert_eq!(cfg.database_path().unwrap(), PathBuf::from("/tmp/studyroom.db"));
    }

    #[test]
    fn set_value_rejects_unknown_key_and_bad_types() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set_value("timer.nonexistent", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            cfg.set_value("video.enabled", "not_a_bool"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(cfg.set_value("timer", "1").is_err());
    }

    #[test]
    fn set_value_rejects_invalid_schedule_and_keeps_old_value() {
        let mut cfg = Config::default();
        let err = cfg.set_value("timer.short_break_minutes", "20").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert_eq!(cfg.timer.short_break_minutes, 5);
        assert!(cfg.set_value("timer.tick_millis", "0").is_err());
    }

    #[test]
    fn engine_settings_from_defaults() {
        let settings = Config::default().engine_settings().unwrap();
        assert_eq!(settings.schedule, PhaseSchedule::default());
        assert_eq!(settings.tick, Duration::from_secs(1));
        assert_eq!(settings.presence_grace, Duration::from_secs(300));
        assert_eq!(settings.self_destruct_grace, Duration::from_secs(300));
        assert_eq!(settings.room_autoclose, Duration::from_secs(300));
    }

    #[test]
    fn load_from_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.timer.tick_millis, 1000);

        std::fs::write(&path, "[timer\n").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::LoadFailed { .. })
        ));
    }
}
