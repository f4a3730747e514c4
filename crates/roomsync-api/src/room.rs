//! Room identity and the records stored under a room

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::value::Timestamp;

/// Literal prefix of every room identifier.
pub const ROOM_ID_PREFIX: &str = "room";

/// Room numbers are in `[0, MAX_ROOM_NUMBER)`.
pub const MAX_ROOM_NUMBER: u32 = 1000;

/// Error returned when a string is not a valid [`RoomId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Room id {input} not valid, expected format: room123 (< 1000)")]
pub struct RoomIdError {
    pub input: String,
}

/// Shareable room name: `"room"` followed by a decimal number below 1000.
///
/// The textual form is exact: no sign, no whitespace, no leading zeros
/// (except `room0` itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(u32);

impl RoomId {
    pub fn new(number: u32) -> Result<Self, RoomIdError> {
        if number < MAX_ROOM_NUMBER {
            Ok(Self(number))
        } else {
            Err(RoomIdError {
                input: format!("{ROOM_ID_PREFIX}{number}"),
            })
        }
    }

    /// Room for an arbitrary number, reduced into range.
    pub fn wrapping(number: u32) -> Self {
        Self(number % MAX_ROOM_NUMBER)
    }

    pub fn number(&self) -> u32 {
        self.0
    }
}

impl FromStr for RoomId {
    type Err = RoomIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RoomIdError {
            input: s.to_string(),
        };

        let digits = s.strip_prefix(ROOM_ID_PREFIX).ok_or_else(invalid)?;
        if digits.is_empty() || digits.len() > 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if digits.len() > 1 && digits.starts_with('0') {
            return Err(invalid());
        }

        let number: u32 = digits.parse().map_err(|_| invalid())?;
        RoomId::new(number).map_err(|_| invalid())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", ROOM_ID_PREFIX, self.0)
    }
}

impl TryFrom<String> for RoomId {
    type Error = RoomIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.to_string()
    }
}

/// Store-generated key of a room record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomHandle(String);

impl RoomHandle {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-session client identity.
///
/// Randomly generated and not checked for collisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderId(String);

impl SenderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Membership entry appended when a client starts listening to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub sender_id: SenderId,
    pub joined_at: Timestamp,
}

/// A room as stored under `<app>/rooms/<handle>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub room_name: String,
    pub room_id: RoomId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<HashMap<String, Member>>,
    /// Transform snapshots keyed by object key, kept raw so one bad slot
    /// does not make the whole room unreadable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objects: Option<HashMap<String, JsonValue>>,
}

impl RoomRecord {
    /// A fresh record with server-assigned timestamps and no children.
    pub fn new(room_name: impl Into<String>, room_id: RoomId) -> Self {
        Self {
            room_name: room_name.into(),
            room_id,
            created_at: Timestamp::server(),
            updated_at: Timestamp::server(),
            members: None,
            objects: None,
        }
    }
}

/// Summary handed to the caller once the session is listening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub identifier: RoomId,
    pub handle: RoomHandle,
    pub sender_id: SenderId,
    pub shareable_url: String,
    pub app_id: String,
    /// Store path of the room record
    pub room_path: String,
}
