//! In-process room bookkeeping for offline use, simulation and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::token::TokenSigner;
use super::VideoRooms;
use crate::error::VideoRoomError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalRoom {
    pub autoclose_after: Duration,
    pub active: bool,
}

pub struct LocalVideoRooms {
    rooms: Mutex<HashMap<String, LocalRoom>>,
    signer: TokenSigner,
    fail_next: AtomicBool,
}

impl LocalVideoRooms {
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            signer: TokenSigner::new("local", "local-secret"),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn room(&self, room_id: &str) -> Option<LocalRoom> {
        self.rooms
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(room_id)
            .copied()
    }

    /// Make the next create or deactivate call fail.
    pub fn fail_next_call(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.fail_next.swap(false, Ordering::SeqCst)
    }
}

impl Default for LocalVideoRooms {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoRooms for LocalVideoRooms {
    async fn create_room(&self, room_id: &str, autoclose_after: Duration) -> Result<(), VideoRoomError> {
        if self.take_failure() {
            return Err(VideoRoomError::CreateFailed {
                room_id: room_id.to_string(),
                message: "injected failure".into(),
            });
        }
        let mut rooms = self.rooms.lock().unwrap_or_else(|p| p.into_inner());
        let room = rooms.entry(room_id.to_string()).or_insert(LocalRoom {
            autoclose_after,
            active: false,
        });
        room.active = true;
        Ok(())
    }

    async fn deactivate_room(&self, room_id: &str) -> Result<(), VideoRoomError> {
        if self.take_failure() {
            return Err(VideoRoomError::DeactivateFailed {
                room_id: room_id.to_string(),
                message: "injected failure".into(),
            });
        }
        if let Some(room) = self
            .rooms
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get_mut(room_id)
        {
            room.active = false;
        }
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

    #[tokio::test]
    async fn rooms_activate_and_deactivate() {
        let rooms = LocalVideoRooms::new();
        rooms.create_room("r1", Duration::from_secs(300)).await.unwrap();
        assert!(rooms.room("r1").unwrap().active);
        rooms.deactivate_room("r1").await.unwrap();
        assert!(!rooms.room("r1").unwrap().active);
        rooms.deactivate_room("unknown").await.unwrap();
    }

    #[tokio::test]
    async fn injected_failure_is_consumed() {
        let rooms = LocalVideoRooms::new();
        rooms.fail_next_call();
        assert!(rooms.create_room("r1", Duration::from_secs(1)).await.is_err());
        assert!(rooms.create_room("r1", Duration::from_secs(1)).await.is_ok());
    }
}
