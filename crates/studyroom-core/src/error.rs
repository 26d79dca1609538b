//! Core error types for studyroom-core.
//!
//! This module defines the error hierarchy using thiserror. Every public
//! operation returns [`CoreError`]; idempotent no-ops (acting on a deleted
//! session, starting a running timer) are `Ok`, never errors.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for studyroom-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Entity is absent, soft-deleted, or excluded by the finished filter.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Requester is not allowed to perform the operation.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed input to a mutating operation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Durable or realtime store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Video-room provisioning failure.
    #[error("Video room error: {0}")]
    VideoRoom(#[from] VideoRoomError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// HTTP-equivalent status for the thin routing layer.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::NotFound { .. } => 404,
            CoreError::Unauthorized(_) => 401,
            CoreError::Validation(_) => 400,
            CoreError::Store(_)
            | CoreError::VideoRoom(_)
            | CoreError::Config(_)
            | CoreError::Io(_)
            | CoreError::Json(_) => 500,
        }
    }

    /// Short client-facing message. Dependency failures never leak detail.
    pub fn public_message(&self) -> String {
        match self {
            CoreError::NotFound { entity, .. } => format!("{entity} not found"),
            CoreError::Unauthorized(_) => "Unauthorized".to_string(),
            CoreError::Validation(err) => format!("Invalid request body: {err}"),
            _ => "Internal server error".to_string(),
        }
    }

    /// Whether the failure came from an external dependency.
    pub fn is_dependency_failure(&self) -> bool {
        self.status_code() >= 500
    }
}

/// Store-specific errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Query or write failed in the backing engine
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Stored document could not be decoded
    #[error("Corrupt document {collection}/{id}: {message}")]
    Corrupt {
        collection: &'static str,
        id: String,
        message: String,
    },

    /// Store is locked or poisoned
    #[error("Store is locked")]
    Locked,

    /// Store was unreachable (used by test doubles to inject outages)
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Video-room service errors.
#[derive(Error, Debug)]
pub enum VideoRoomError {
    #[error("Failed to create room {room_id}: {message}")]
    CreateFailed { room_id: String, message: String },

    #[error("Failed to deactivate room {room_id}: {message}")]
    DeactivateFailed { room_id: String, message: String },

    #[error("Failed to sign participant token: {0}")]
    TokenFailed(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Home/config directory could not be determined or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors with field-level detail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Required field is empty
    #[error("'{field}' must not be empty")]
    Empty { field: &'static str },

    /// Field exceeds its maximum length
    #[error("'{field}' must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: &'static str, message: String },
}

impl ValidationError {
    /// Name of the offending field.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Empty { field }
            | ValidationError::TooLong { field, .. }
            | ValidationError::InvalidValue { field, .. } => field,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _msg) => {
                if inner.code == rusqlite::ErrorCode::DatabaseLocked
                    || inner.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    StoreError::Locked
                } else {
                    StoreError::QueryFailed(err.to_string())
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
