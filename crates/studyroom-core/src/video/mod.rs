//! Video-room provisioning.
//!
//! Each session owns one room with the same id. Rooms are created when the
//! first member joins and deactivated when the session is deleted.

mod local;
mod token;
mod videosdk;

pub use local::LocalVideoRooms;
pub use token::{Claims, Permission, TokenSigner, TOKEN_AUDIENCE};
pub use videosdk::VideoSdkRooms;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ConfigError, VideoRoomError};
use crate::storage::VideoConfig;

/// Video-room service consumed by the engine.
#[async_trait]
pub trait VideoRooms: Send + Sync {
    /// Create the room if it is not active yet. The provider closes it
    /// after `autoclose_after` without participants.
    async fn create_room(&self, room_id: &str, autoclose_after: Duration) -> Result<(), VideoRoomError>;

    /// Deactivate the room. Rooms that were never created are a no-op.
    async fn deactivate_room(&self, room_id: &str) -> Result<(), VideoRoomError>;

    /// Participant token. Without `can_join_immediately` the participant
    /// waits in the lobby.
    async fn issue_token(
        &self,
        room_id: &str,
        participant_id: &str,
        can_join_immediately: bool,
    ) -> Result<String, VideoRoomError>;
}

/// Build the configured provider.
pub fn from_config(config: &VideoConfig) -> Result<Arc<dyn VideoRooms>, ConfigError> {
    if !config.enabled {
        return Ok(Arc::new(LocalVideoRooms::new()));
    }
    for (key, value) in [("video.api_key", &config.api_key), ("video.api_secret", &config.api_secret)] {
        if value.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: key.into(),
                message: "required when video.enabled is true".into(),
            });
        }
    }
    let rooms = VideoSdkRooms::new(&config.base_url, &config.api_key, &config.api_secret)?;
    Ok(Arc::new(rooms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_provider_is_local() {
        assert!(from_config(&VideoConfig::default()).is_ok());
    }

    #[test]
    fn enabled_provider_needs_credentials() {
        let config = VideoConfig {
            enabled: true,
            ..VideoConfig::default()
        };
        assert!(matches!(
            from_config(&config),
            Err(ConfigError::InvalidValue { .. })
        ));

        let config = VideoConfig {
            enabled: true,
            api_key: "key".into(),
            api_secret: "secret".into(),
            ..VideoConfig::default()
        };
        assert!(from_config(&config).is_ok());
    }
}
