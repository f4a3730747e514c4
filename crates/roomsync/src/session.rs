//! Caller-facing session: register objects, connect to a room, save.

use roomsync_api::{RoomId, RoomInfo, SenderId, StoreError, TransformSnapshot};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::ids::{IdSource, RandomIds};
use crate::registry::{ObjectRegistry, SharedObject};
use crate::room::{ConnectionContext, Resolution, RoomCoordinator, RoomPhase, SessionState};
use crate::store::{RemoteStore, StorePath};
use crate::sync::{SyncEvent, TransformSync};

const EVENT_CAPACITY: usize = 256;

/// How `RoomSync::connect` ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    /// Nothing was registered; the store was not touched
    NoObjects,
    /// A room was created under a generated id. Connect again with `url`
    Redirect { room_id: RoomId, url: String },
    /// Listening for remote changes
    Ready(RoomInfo),
    /// A store call failed while resolving the room
    Degraded { room_id: RoomId, error: StoreError },
}

pub struct RoomSyncBuilder {
    store: Arc<dyn RemoteStore>,
    config: SyncConfig,
    ids: Arc<dyn IdSource>,
    clock: Arc<dyn Clock>,
}

impl RoomSyncBuilder {
    pub fn ids(mut self, ids: Arc<dyn IdSource>) -> Self {
        self.ids = ids;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<RoomSync, SyncError> {
        self.config.validate()?;

        let app_root = StorePath::root().child(&self.config.app_id);
        let sender_id = self.ids.sender_id();
        let registry = Arc::new(RwLock::new(ObjectRegistry::new()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let coordinator =
            RoomCoordinator::new(Arc::clone(&self.store), Arc::clone(&self.ids), &app_root);
        let sync = Arc::new(TransformSync::new(
            self.store,
            self.clock,
            sender_id.clone(),
            &app_root,
            Arc::clone(&registry),
            self.config.latency_sample_count,
            events.clone(),
        ));

        info!(app_id = %self.config.app_id, %sender_id, "Sync session created");
        Ok(RoomSync {
            inner: Arc::new(Inner {
                config: self.config,
                registry,
                coordinator,
                sync,
                state: RwLock::new(SessionState::new(sender_id)),
                listener: Mutex::new(None),
                events,
            }),
        })
    }
}

struct Inner {
    config: SyncConfig,
    registry: Arc<RwLock<ObjectRegistry>>,
    coordinator: RoomCoordinator,
    sync: Arc<TransformSync>,
    state: RwLock<SessionState>,
    listener: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SyncEvent>,
}

/// One client's view of a shared room.
///
/// Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct RoomSync {
    inner: Arc<Inner>,
}

impl RoomSync {
    pub fn builder(store: Arc<dyn RemoteStore>, config: SyncConfig) -> RoomSyncBuilder {
        RoomSyncBuilder {
            store,
            config,
            ids: Arc::new(RandomIds),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn new(store: Arc<dyn RemoteStore>, config: SyncConfig) -> Result<Self, SyncError> {
        Self::builder(store, config).build()
    }

    pub fn sender_id(&self) -> &SenderId {
        self.inner.sync.sender_id()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub async fn session_state(&self) -> SessionState {
        self.inner.state.read().await.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Register `object` for sync under `key`. Must happen before `connect`
    /// for the object to receive remote updates.
    pub async fn register(&self, object: SharedObject, key: &str) -> Result<(), SyncError> {
        if self.inner.listener.lock().await.is_some() {
            warn!(key, "Registered after connect, remote updates arrive only after reconnecting");
        }
        self.inner.registry.write().await.register(object, key).await
    }

    /// Resolve the room named by `context` (or create one) and start
    /// listening.
    ///
    /// Connecting again replaces the previous session's listener.
    #[instrument(skip(self, context), fields(url = context.url()))]
    pub async fn connect(&self, context: &ConnectionContext) -> Result<ConnectOutcome, SyncError> {
        if self.inner.registry.read().await.is_empty() {
            error!("Objects must be registered before connecting");
            return Ok(ConnectOutcome::NoObjects);
        }

        self.disconnect().await;
        let fresh = SessionState::new(self.sender_id().clone());
        let (state, resolution) = self.inner.coordinator.resolve(fresh, context).await?;
        *self.inner.state.write().await = state.clone();

        match resolution {
            Resolution::Redirect { room_id, url } => Ok(ConnectOutcome::Redirect { room_id, url }),
            Resolution::Degraded { room_id, error } => {
                warn!(%room_id, %error, "Room could not be resolved");
                Ok(ConnectOutcome::Degraded { room_id, error })
            }
            Resolution::Join => {
                let room = self.inner.coordinator.join(&state).await?;
                self.inner.sync.bind_room(room.clone()).await;
                let listener = Arc::clone(&self.inner.sync).listen().await?;
                *self.inner.listener.lock().await = Some(listener);

                let info = RoomInfo {
                    identifier: room.room_id,
                    handle: room.handle.clone(),
                    sender_id: state.sender_id.clone(),
                    shareable_url: state
                        .shareable_url
                        .clone()
                        .unwrap_or_else(|| context.url().to_string()),
                    app_id: self.inner.config.app_id.clone(),
                    room_path: room.path.to_string(),
                };
                info!(room_id = %info.identifier, url = %info.shareable_url, "Room ready");
                Ok(ConnectOutcome::Ready(info))
            }
        }
    }

    /// Publish `object`'s current state. Does nothing before the room is
    /// resolved.
    pub async fn save(&self, object: &SharedObject) {
        self.inner.sync.save(object).await;
    }

    /// Publish every registered object that changed since its last observed
    /// snapshot.
    pub async fn save_all_changed(&self) {
        self.inner.sync.save_all_changed().await;
    }

    pub async fn last_observed(&self, key: &str) -> Option<TransformSnapshot> {
        self.inner.sync.last_observed(key).await
    }

    /// Stop listening and forget the room. Registered objects are kept but
    /// wait for their first remote state again on the next `connect`.
    pub async fn disconnect(&self) {
        let listener = self.inner.listener.lock().await.take();
        if let Some(listener) = listener {
            listener.abort();
            // Cancelled is the expected outcome here
            let _ = listener.await;
            info!("Stopped listening for remote changes");
        }
        self.inner.sync.unbind_room().await;
        self.inner.sync.reset().await;

        let mut state = self.inner.state.write().await;
        if state.phase == RoomPhase::Listening {
            *state = SessionState::new(state.sender_id.clone());
        }
    }
}
