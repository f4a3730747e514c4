//! Deterministic stand-ins for clocks and id generation, plus helpers for
//! waiting on sync events in async tests.

use anyhow::Result;
use roomsync_api::{RoomId, SenderId};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::clock::Clock;
use crate::ids::IdSource;
use crate::sync::SyncEvent;

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Always hands out the same sender id and room number.
///
/// The room number doubles as the number in generated room names, so a
/// room created through `FixedIds::new("user1", 42)` is named "Room 42".
#[derive(Debug, Clone)]
pub struct FixedIds {
    sender_id: SenderId,
    room_number: u32,
}

impl FixedIds {
    pub fn new(sender_id: &str, room_number: u32) -> Self {
        Self {
            sender_id: SenderId::new(sender_id),
            room_number,
        }
    }
}

impl IdSource for FixedIds {
    fn sender_id(&self) -> SenderId {
        self.sender_id.clone()
    }

    fn room_id(&self) -> RoomId {
        RoomId::wrapping(self.room_number)
    }

    fn room_name_number(&self) -> u32 {
        self.room_number
    }
}

/// Receive events until one satisfies `matches`, or fail after `timeout_duration`.
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<SyncEvent>,
    timeout_duration: Duration,
    mut matches: F,
) -> Result<SyncEvent>
where
    F: FnMut(&SyncEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout_duration;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            anyhow::bail!("Timeout waiting for sync event");
        }

        match timeout(remaining, events.recv()).await {
            Ok(Ok(event)) if matches(&event) => return Ok(event),
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                tracing::warn!(skipped, "Event receiver lagged");
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                anyhow::bail!("Event channel closed while waiting");
            }
            Err(_) => anyhow::bail!("Timeout waiting for sync event"),
        }
    }
}

/// Let spawned listener tasks drain whatever the store has delivered.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
