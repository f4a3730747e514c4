//! Error types for the sync session

use roomsync_api::{RoomIdError, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Object key cannot be empty")]
    EmptyKey,

    #[error("Object key already registered: {key}")]
    DuplicateKey { key: String },

    #[error("Object already registered under key: {key}")]
    ObjectAlreadyRegistered { key: String },

    #[error(transparent)]
    InvalidRoomId(#[from] RoomIdError),

    #[error("Cannot subscribe, no room handle for room {room}")]
    MissingRoomHandle { room: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

impl SyncError {
    /// Errors that must stop session establishment rather than degrade it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidRoomId(_) | SyncError::MissingRoomHandle { .. }
        )
    }
}
