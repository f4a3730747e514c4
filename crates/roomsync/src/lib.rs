pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod registry;
pub mod room;
pub mod session;
pub mod store;
pub mod sync;
pub mod testing;

pub use config::SyncConfig;
pub use error::SyncError;
pub use registry::{ObjectRegistry, SharedObject, SyncedObject, UserData};
pub use room::{ConnectionContext, RoomCoordinator, RoomPhase, SessionState};
pub use session::{ConnectOutcome, RoomSync, RoomSyncBuilder};
pub use store::{MemoryStore, RemoteStore, StorePath};
pub use sync::{same_object_data, SyncEvent, TransformSync};

pub use roomsync_api::{
    LatencyReport, RoomHandle, RoomId, RoomInfo, SenderId, StoreError, Transform,
    TransformSnapshot, Vector3,
};
