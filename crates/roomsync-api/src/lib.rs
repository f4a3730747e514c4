use serde::{Deserialize, Serialize};

pub mod latency;
pub mod room;
pub mod transform;
pub mod value;

pub use latency::LatencyReport;
pub use room::{
    Member, RoomHandle, RoomId, RoomIdError, RoomInfo, RoomRecord, SenderId, MAX_ROOM_NUMBER,
    ROOM_ID_PREFIX,
};
pub use transform::{Transform, TransformSnapshot, Vector3};
pub use value::{is_server_timestamp, server_timestamp, values_equal, Timestamp};

/// Structured error types for remote store operations.
///
/// Serializable so they can be carried through completion channels and
/// recorded in the in-memory store's operation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum StoreError {
    #[error("Write failed at {path}: {message}")]
    WriteFailed { path: String, message: String },

    #[error("Query failed at {path}: {message}")]
    QueryFailed { path: String, message: String },

    #[error("Subscription cancelled at {path}: {message}")]
    SubscriptionCancelled { path: String, message: String },

    #[error("Store disconnected: {message}")]
    Disconnected { message: String },

    #[error("Invalid value at {path}: {message}")]
    InvalidValue { path: String, message: String },
}
