//! Room discovery and creation
//!
//! Three ways a connection resolves:
//! 1. No room in the connection URL: generate one, create it, redirect.
//! 2. Room in the URL and present in the store: join it.
//! 3. Room in the URL but absent from the store: create it, then join it.
//!
//! Each step takes the `SessionState` and hands back the updated one, so
//! transitions can be driven and inspected one at a time.

pub mod state;

pub use state::{ConnectionContext, JoinedRoom, RoomPhase, SessionState, ROOM_QUERY_KEY};

use roomsync_api::{Member, RoomHandle, RoomId, RoomRecord, StoreError, Timestamp};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::SyncError;
use crate::ids::IdSource;
use crate::store::{log_completion, report_store_error, PendingPush, RemoteStore, StorePath};

/// Field of a room record matched by the existence query
const ROOM_ID_FIELD: &str = "roomId";

/// How room resolution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The room was created under a generated identifier; the caller must
    /// start a new session with `url`
    Redirect { room_id: RoomId, url: String },
    /// A room handle is known; the session can start listening
    Join,
    /// A store call failed; the session cannot proceed
    Degraded { room_id: RoomId, error: StoreError },
}

pub struct RoomCoordinator {
    store: Arc<dyn RemoteStore>,
    ids: Arc<dyn IdSource>,
    /// `<app>/rooms`
    rooms: StorePath,
}

impl RoomCoordinator {
    pub fn new(store: Arc<dyn RemoteStore>, ids: Arc<dyn IdSource>, app_root: &StorePath) -> Self {
        Self {
            store,
            ids,
            rooms: app_root.child("rooms"),
        }
    }

    pub fn rooms_path(&self) -> &StorePath {
        &self.rooms
    }

    /// Drive `state` from `Unbound` until it either has a handle to join or
    /// ends in a redirect or a store failure.
    ///
    /// A malformed room identifier in `context` is the one fatal outcome.
    pub async fn resolve(
        &self,
        mut state: SessionState,
        context: &ConnectionContext,
    ) -> Result<(SessionState, Resolution), SyncError> {
        let Some(candidate) = context.room_candidate() else {
            let room_id = self.ids.room_id();
            let url = context.url_with_room(room_id);
            info!(%room_id, "No room id in connection URL, generating one");

            state.room_id = Some(room_id);
            state.shareable_url = Some(url.clone());
            state.self_generated = true;

            let (state, created) = self.create_and_await(state, room_id).await?;
            let resolution = match created {
                Ok(()) => {
                    info!(%room_id, %url, "Room created, reconnect with room id in URL");
                    Resolution::Redirect { room_id, url }
                }
                Err(error) => Resolution::Degraded { room_id, error },
            };
            return Ok((state, resolution));
        };

        let room_id: RoomId = candidate.parse().map_err(|e| {
            error!(candidate, "Malformed room id in connection URL");
            SyncError::InvalidRoomId(e)
        })?;
        state.room_id = Some(room_id);
        state.shareable_url = Some(context.url().to_string());
        state.phase = RoomPhase::ResolvingExistingRoom;
        info!(%room_id, "Looking up room");

        match self.find_room(room_id).await {
            Ok(Some(handle)) => {
                info!(%room_id, %handle, "Found existing room");
                state.handle = Some(handle);
                state.phase = RoomPhase::Listening;
                Ok((state, Resolution::Join))
            }
            Ok(None) => {
                info!(%room_id, rooms = %self.rooms, "No such room, creating it");
                let (mut state, created) = self.create_and_await(state, room_id).await?;
                let resolution = match created {
                    Ok(()) => {
                        state.phase = RoomPhase::Listening;
                        Resolution::Join
                    }
                    Err(error) => Resolution::Degraded { room_id, error },
                };
                Ok((state, resolution))
            }
            Err(error) => {
                report_store_error("find room", &error);
                Ok((state, Resolution::Degraded { room_id, error }))
            }
        }
    }

    async fn create_and_await(
        &self,
        mut state: SessionState,
        room_id: RoomId,
    ) -> Result<(SessionState, Result<(), StoreError>), SyncError> {
        state.phase = RoomPhase::CreatingRoom;
        let pending = self.create_room(room_id)?;

        state.handle = Some(RoomHandle::new(pending.key.clone()));
        state.phase = RoomPhase::AwaitingCreationAck;

        let path = pending.path.clone();
        let created = pending.committed().await;
        match &created {
            Ok(()) => info!(%room_id, %path, "Created room"),
            Err(error) => report_store_error("create room", error),
        }
        Ok((state, created))
    }

    /// Handle of the first room whose record carries `room_id`.
    pub async fn find_room(&self, room_id: RoomId) -> Result<Option<RoomHandle>, StoreError> {
        let matches = self
            .store
            .query_equal(&self.rooms, ROOM_ID_FIELD, &JsonValue::from(room_id.to_string()))
            .await?;

        if matches.len() > 1 {
            warn!(%room_id, count = matches.len(), "Several rooms share this id, using the first");
        }
        Ok(matches
            .into_iter()
            .next()
            .map(|(key, _)| RoomHandle::new(key)))
    }

    /// Push a new room record. The handle is usable before the write commits.
    pub fn create_room(&self, room_id: RoomId) -> Result<PendingPush, SyncError> {
        let name = format!("Room {}", self.ids.room_name_number());
        let record = RoomRecord::new(name, room_id);
        let value = serde_json::to_value(&record).map_err(|e| StoreError::InvalidValue {
            path: self.rooms.to_string(),
            message: e.to_string(),
        })?;
        Ok(self.store.push(&self.rooms, value))
    }

    /// Enter the room resolved in `state`: append this session's member record.
    pub async fn join(&self, state: &SessionState) -> Result<JoinedRoom, SyncError> {
        let (Some(room_id), Some(handle)) = (state.room_id, state.handle.clone()) else {
            return Err(SyncError::MissingRoomHandle {
                room: state
                    .room_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            });
        };

        let room = JoinedRoom::new(room_id, handle, &self.rooms);
        let member = Member {
            sender_id: state.sender_id.clone(),
            joined_at: Timestamp::server(),
        };
        let value = serde_json::to_value(&member).map_err(|e| StoreError::InvalidValue {
            path: room.members().to_string(),
            message: e.to_string(),
        })?;
        log_completion(
            "add member",
            self.store.push(&room.members(), value).committed().await,
        );

        info!(%room_id, path = %room.path, "Subscribing to room");
        Ok(room)
    }
}
