//! Session state passed through the room lifecycle transitions

use roomsync_api::{RoomHandle, RoomId, SenderId};

use crate::store::StorePath;

/// Query-string key carrying the room identifier.
pub const ROOM_QUERY_KEY: &str = "room";

/// Phases of room resolution, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Unbound,
    ResolvingExistingRoom,
    CreatingRoom,
    AwaitingCreationAck,
    Listening,
}

/// Everything the coordinator knows about the current session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub phase: RoomPhase,
    pub sender_id: SenderId,
    pub room_id: Option<RoomId>,
    pub handle: Option<RoomHandle>,
    pub shareable_url: Option<String>,
    /// The room id was generated by this session, so it ends in a redirect
    pub self_generated: bool,
}

impl SessionState {
    pub fn new(sender_id: SenderId) -> Self {
        Self {
            phase: RoomPhase::Unbound,
            sender_id,
            room_id: None,
            handle: None,
            shareable_url: None,
            self_generated: false,
        }
    }
}

/// Where the caller is connecting from: the page or deep link URL whose
/// query string may name a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    url: String,
}

impl ConnectionContext {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// First non-empty `room=` value of the query string, unvalidated.
    pub fn room_candidate(&self) -> Option<&str> {
        let (_, query) = self.url.split_once('?')?;
        let query = query.split('#').next().unwrap_or_default();
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == ROOM_QUERY_KEY)
            .map(|(_, value)| value)
            .filter(|value| !value.is_empty())
    }

    /// This URL with the room identifier appended to its query string.
    pub fn url_with_room(&self, room_id: RoomId) -> String {
        let (base, fragment) = match self.url.split_once('#') {
            Some((base, fragment)) => (base, Some(fragment)),
            None => (self.url.as_str(), None),
        };
        let separator = if base.contains('?') { '&' } else { '?' };
        let mut url = format!("{base}{separator}{ROOM_QUERY_KEY}={room_id}");
        if let Some(fragment) = fragment {
            url.push('#');
            url.push_str(fragment);
        }
        url
    }
}

/// A resolved room the session is listening to.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRoom {
    pub room_id: RoomId,
    pub handle: RoomHandle,
    /// `<app>/rooms/<handle>`
    pub path: StorePath,
}

impl JoinedRoom {
    pub fn new(room_id: RoomId, handle: RoomHandle, rooms: &StorePath) -> Self {
        let path = rooms.child(handle.as_str());
        Self {
            room_id,
            handle,
            path,
        }
    }

    pub fn slot(&self, key: &str) -> StorePath {
        self.path.child("objects").child(key)
    }

    pub fn members(&self) -> StorePath {
        self.path.child("members")
    }

    pub fn updated_at(&self) -> StorePath {
        self.path.child("updatedAt")
    }
}
