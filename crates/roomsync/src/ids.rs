//! Random identifiers for senders and rooms
//!
//! Neither is checked for collisions: two sessions may draw the same sender
//! id, and two clients may generate the same room number.

use rand::Rng;
use roomsync_api::{RoomId, SenderId, MAX_ROOM_NUMBER};

pub trait IdSource: Send + Sync {
    /// Identity for a new session
    fn sender_id(&self) -> SenderId;

    /// Identifier for a room this session creates itself
    fn room_id(&self) -> RoomId;

    /// Number used in a new room's display name
    fn room_name_number(&self) -> u32;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdSource for RandomIds {
    fn sender_id(&self) -> SenderId {
        SenderId::new(format!("user{}", rand::thread_rng().gen_range(0..=1000)))
    }

    fn room_id(&self) -> RoomId {
        RoomId::wrapping(rand::thread_rng().gen_range(0..MAX_ROOM_NUMBER))
    }

    fn room_name_number(&self) -> u32 {
        rand::thread_rng().gen_range(0..=1000)
    }
}
