//! HS256 JSON Web Tokens for the video provider.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::VideoRoomError;

type HmacSha256 = Hmac<Sha256>;

/// Audience claim on every token we sign.
pub const TOKEN_AUDIENCE: &str = "studyroom-session";

/// Room permission carried in a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Enter the room directly.
    AllowJoin,
    /// Moderate the room.
    AllowMod,
    /// Wait in the lobby for approval.
    AskJoin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub api_key: String,
    pub permissions: Vec<Permission>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs tokens with the provider's API secret.
#[derive(Clone)]
pub struct TokenSigner {
    api_key: String,
    secret: Vec<u8>,
}

impl TokenSigner {
    pub fn new(api_key: impl Into<String>, api_secret: impl AsRef<[u8]>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: api_secret.as_ref().to_vec(),
        }
    }

    /// Server-side token for room management calls, valid for a year.
    pub fn admin_token(&self) -> Result<String, VideoRoomError> {
        self.sign(&self.claims(
            vec![Permission::AllowJoin, Permission::AllowMod],
            None,
            None,
            Duration::days(365),
        ))
    }

    /// Participant token for one room, valid for a day.
    pub fn participant_token(
        &self,
        room_id: &str,
        participant_id: &str,
        can_join_immediately: bool,
    ) -> Result<String, VideoRoomError> {
        let permission = if can_join_immediately {
            Permission::AllowJoin
        } else {
            Permission::AskJoin
        };
        self.sign(&self.claims(
            vec![permission],
            Some(room_id.to_string()),
            Some(participant_id.to_string()),
            Duration::days(1),
        ))
    }

    fn claims(
        &self,
        permissions: Vec<Permission>,
        room_id: Option<String>,
        participant_id: Option<String>,
        ttl: Duration,
    ) -> Claims {
        let now = Utc::now();
        Claims {
            api_key: self.api_key.clone(),
            permissions,
            version: room_id.as_ref().map(|_| 2),
            room_id,
            participant_id,
            aud: TOKEN_AUDIENCE.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, VideoRoomError> {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = serde_json::to_vec(claims).map_err(|e| VideoRoomError::TokenFailed(e.to_string()))?;
        let signing_input = format!("{header}.{}", URL_SAFE_NO_PAD.encode(payload));

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| VideoRoomError::TokenFailed(e.to_string()))?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{signing_input}.{signature}"))
    }

    /// Check the signature and decode the claims. Expiry is not checked.
    pub fn verify(&self, token: &str) -> Result<Claims, VideoRoomError> {
        let invalid = |msg: &str| VideoRoomError::TokenFailed(msg.to_string());
        let (signing_input, signature) = token.rsplit_once('.').ok_or_else(|| invalid("malformed token"))?;
        let (_, payload) = signing_input
            .split_once('.')
            .ok_or_else(|| invalid("malformed token"))?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| invalid("bad signature encoding"))?;
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| VideoRoomError::TokenFailed(e.to_string()))?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| invalid("signature mismatch"))?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| invalid("bad payload encoding"))?;
        serde_json::from_slice(&payload).map_err(|e| VideoRoomError::TokenFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_token_carries_room_and_permission() {
        let signer = TokenSigner::new("key", "secret");
        let token = signer.participant_token("room-1", "ada", true).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = signer.verify(&token).unwrap();
        assert_eq!(claims.room_id.as_deref(), Some("room-1"));
        assert_eq!(claims.participant_id.as_deref(), Some("ada"));
        assert_eq!(claims.permissions, vec![Permission::AllowJoin]);
        assert_eq!(claims.version, Some(2));
        assert_eq!(claims.aud, TOKEN_AUDIENCE);
        assert!(claims.exp > claims.iat);

        let lobby = signer.participant_token("room-1", "bob", false).unwrap();
        assert_eq!(signer.verify(&lobby).unwrap().permissions, vec![Permission::AskJoin]);
    }

    #[test]
    fn admin_token_has_no_room() {
        let signer = TokenSigner::new("key", "secret");
        let claims = signer.verify(&signer.admin_token().unwrap()).unwrap();
        assert!(claims.room_id.is_none());
        assert!(claims.permissions.contains(&Permission::AllowMod));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = TokenSigner::new("key", "secret").admin_token().unwrap();
        assert!(TokenSigner::new("key", "other").verify(&token).is_err());
        assert!(TokenSigner::new("key", "secret").verify("not-a-token").is_err());
    }
}
