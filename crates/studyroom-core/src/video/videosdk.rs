//! VideoSDK REST client.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use super::token::TokenSigner;
use super::VideoRooms;
use crate::error::{ConfigError, VideoRoomError};

pub struct VideoSdkRooms {
    base_url: Url,
    signer: TokenSigner,
    admin_token: String,
    http_client: Client,
    /// Rooms this process created and has not deactivated.
    active: Mutex<HashSet<String>>,
}

impl VideoSdkRooms {
    /// Create a client against `base_url` (e.g. `https://api.videosdk.live/v2`).
    pub fn new(base_url: &str, api_key: &str, api_secret: &str) -> Result<Self, ConfigError> {
        let mut base_url = Url::parse(base_url).map_err(|e| ConfigError::InvalidValue {
            key: "video.base_url".into(),
            message: e.to_string(),
        })?;
        // Url::join replaces the last segment unless the path ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let signer = TokenSigner::new(api_key, api_secret);
        let admin_token = signer.admin_token().map_err(|e| ConfigError::InvalidValue {
            key: "video.api_secret".into(),
            message: e.to_string(),
        })?;

        Ok(Self {
            base_url,
            signer,
            admin_token,
            http_client: Client::new(),
            active: Mutex::new(HashSet::new()),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, String> {
        self.base_url.join(path).map_err(|e| e.to_string())
    }

    fn is_active(&self, room_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(room_id)
    }

    fn set_active(&self, room_id: &str, active: bool) {
        let mut rooms = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if active {
            rooms.insert(room_id.to_string());
        } else {
            rooms.remove(room_id);
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), String> {
        let url = self.endpoint(path)?;
        let resp = self
            .http_client
            .post(url)
            .header("Authorization", &self.admin_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            Err(format!("HTTP {status}: {text}"))
        }
    }
}

#[async_trait]
impl VideoRooms for VideoSdkRooms {
    async fn create_room(&self, room_id: &str, autoclose_after: Duration) -> Result<(), VideoRoomError> {
        if self.is_active(room_id) {
            return Ok(());
        }
        let body = json!({
            "customRoomId": room_id,
            "autoCloseConfig": {
                "type": "session-end-and-deactivate",
                "duration": autoclose_after.as_secs(),
            },
        });
        self.post("rooms", body)
            .await
            .map_err(|message| VideoRoomError::CreateFailed {
                room_id: room_id.to_string(),
                message,
            })?;
        self.set_active(room_id, true);
        info!(room_id, "video room created");
        Ok(())
    }

    async fn deactivate_room(&self, room_id: &str) -> Result<(), VideoRoomError> {
        if !self.is_active(room_id) {
            debug!(room_id, "video room not active, skipping deactivate");
            return Ok(());
        }
        self.post("rooms/deactivate", json!({ "roomId": room_id }))
            .await
            .map_err(|message| VideoRoomError::DeactivateFailed {
                room_id: room_id.to_string(),
                message,
            })?;
        self.set_active(room_id, false);
        info!(room_id, "video room deactivated");
        Ok(())
    }

    async fn issue_token(
        &self,
        room_id: &str,
        participant_id: &str,
        can_join_immediately: bool,
    ) -> Result<String, VideoRoomError> {
        self.signer
            .participant_token(room_id, participant_id, can_join_immediately)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn rooms_against(server: &mockito::ServerGuard) -> VideoSdkRooms {
        VideoSdkRooms::new(&format!("{}/v2", server.url()), "key", "secret").unwrap()
    }

    #[test]
    fn endpoints_keep_base_path() {
        let rooms = VideoSdkRooms::new("https://api.videosdk.live/v2", "key", "secret").unwrap();
        assert_eq!(
            rooms.endpoint("rooms/deactivate").unwrap().as_str(),
            "https://api.videosdk.live/v2/rooms/deactivate"
        );
    }

    #[test]
    fn rejects_bad_base_url() {
        assert!(VideoSdkRooms::new("not a url", "key", "secret").is_err());
    }

    #[tokio::test]
    async fn deactivating_unknown_room_is_a_no_op() {
        // Port 9 is discard; nothing is contacted because the room is unknown.
        let rooms = VideoSdkRooms::new("http://127.0.0.1:9/v2", "key", "secret").unwrap();
        assert!(rooms.deactivate_room("never-created").await.is_ok());
    }

    #[tokio::test]
    async fn tokens_are_signed_locally() {
        let rooms = VideoSdkRooms::new("http://127.0.0.1:9/v2", "key", "secret").unwrap();
        let token = rooms.issue_token("room", "ada", false).await.unwrap();
        let claims = TokenSigner::new("key", "secret").verify(&token).unwrap();
        assert_eq!(claims.participant_id.as_deref(), Some("ada"));
    }

    #[tokio::test]
    async fn create_and_deactivate_call_the_rooms_api() {
        let mut server = mockito::Server::new_async().await;
        let rooms = rooms_against(&server);

        let create = server
            .mock("POST", "/v2/rooms")
            .match_header("authorization", rooms.admin_token.as_str())
            .match_body(Matcher::PartialJson(json!({
                "customRoomId": "room-1",
                "autoCloseConfig": { "type": "session-end-and-deactivate", "duration": 60 },
            })))
            .with_status(200)
            .with_body(r#"{"roomId":"room-1"}"#)
            .expect(1)
            .create_async()
            .await;
        rooms.create_room("room-1", Duration::from_secs(60)).await.unwrap();
        // Already active: answered without another request.
        rooms.create_room("room-1", Duration::from_secs(60)).await.unwrap();
        create.assert_async().await;

        let deactivate = server
            .mock("POST", "/v2/rooms/deactivate")
            .match_header("authorization", rooms.admin_token.as_str())
            .match_body(Matcher::Json(json!({ "roomId": "room-1" })))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        rooms.deactivate_room("room-1").await.unwrap();
        rooms.deactivate_room("room-1").await.unwrap();
        deactivate.assert_async().await;
    }

    #[tokio::test]
    async fn failed_create_is_an_error_and_leaves_room_inactive() {
        let mut server = mockito::Server::new_async().await;
        let rooms = rooms_against(&server);
        let create = server
            .mock("POST", "/v2/rooms")
            .with_status(500)
            .with_body("provider down")
            .expect(2)
            .create_async()
            .await;

        let err = rooms
            .create_room("room-2", Duration::from_secs(60))
            .await
            .unwrap_err();
        match err {
            VideoRoomError::CreateFailed { room_id, message } => {
                assert_eq!(room_id, "room-2");
                assert!(message.contains("500"));
                assert!(message.contains("provider down"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // Not marked active, so the next create tries again.
        assert!(rooms.create_room("room-2", Duration::from_secs(60)).await.is_err());
        create.assert_async().await;
    }

    #[tokio::test]
    async fn failed_deactivate_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let rooms = rooms_against(&server);
        let _create = server
            .mock("POST", "/v2/rooms")
            .with_status(200)
            .create_async()
            .await;
        let deactivate = server
            .mock("POST", "/v2/rooms/deactivate")
            .with_status(502)
            .expect(1)
            .create_async()
            .await;

        rooms.create_room("room-3", Duration::from_secs(60)).await.unwrap();
        let err = rooms.deactivate_room("room-3").await.unwrap_err();
        assert!(matches!(err, VideoRoomError::DeactivateFailed { ref room_id, .. } if room_id == "room-3"));
        deactivate.assert_async().await;
    }
}
