//! Transform synchronization
//!
//! - `transform_sync`: publish local changes, apply remote ones, bootstrap empty slots
//! - `origin`: self-echo suppression policy
//! - `latency`: one-shot propagation delay sampling

pub mod latency;
pub mod origin;
pub mod transform_sync;

pub use latency::LatencyProbe;
pub use origin::{decide, Decision, Origin};
pub use transform_sync::{same_object_data, TransformSync};

use roomsync_api::{LatencyReport, SenderId, StoreError};

/// Notable things the sync engine did, broadcast to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A local snapshot was written to the object's slot
    Published { key: String },
    /// The slot was empty; local state was published as its first value
    Bootstrapped { key: String },
    /// First remote state was applied and the object is now initialized
    Initialized { key: String },
    /// A peer's snapshot was applied to the local object
    RemoteApplied { key: String, sender_id: SenderId },
    /// Our own write echoed back and was not applied
    EchoIgnored { key: String },
    LatencyReported(LatencyReport),
    SubscriptionCancelled { key: String, error: StoreError },
}
