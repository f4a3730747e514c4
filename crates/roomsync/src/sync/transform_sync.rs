//! Two-way transform sync for registered objects
//!
//! Outbound: `save` / `save_all_changed` write a `TransformSnapshot` into the
//! object's slot under the room. Inbound: every slot value delivered by the
//! store goes through `on_remote_change`, which bootstraps empty slots,
//! suppresses our own echoes once an object is initialized, and feeds peer
//! updates to the latency probe.

use roomsync_api::{server_timestamp, LatencyReport, SenderId, TransformSnapshot};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, error, info, trace};

use super::latency::LatencyProbe;
use super::origin::{decide, Decision, Origin};
use super::SyncEvent;
use crate::clock::Clock;
use crate::error::SyncError;
use crate::registry::{ObjectRegistry, SharedObject, SyncedObject};
use crate::room::JoinedRoom;
use crate::store::{log_completion, report_store_error, RemoteStore, StorePath, ValueStream};

/// True iff the object's transform equals the snapshot's component-wise and
/// their sync payloads are both absent or structurally equal.
pub fn same_object_data(object: &SyncedObject, snapshot: &TransformSnapshot) -> bool {
    snapshot.matches(&object.transform(), object.user_data.sync_data.as_ref())
}

fn apply_snapshot(object: &mut SyncedObject, snapshot: &TransformSnapshot) {
    object.set_transform(snapshot.transform());
    if let Some(data) = &snapshot.sync_data {
        object.user_data.sync_data = Some(data.clone());
    }
}

#[derive(Debug)]
struct SyncBook {
    /// Last snapshot received per key, our own echoes included
    last_observed: HashMap<String, TransformSnapshot>,
    initialized: HashSet<String>,
    probe: LatencyProbe,
}

pub struct TransformSync {
    store: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    sender_id: SenderId,
    /// `<app>/stats/latency`
    latency_path: StorePath,
    latency_sample_count: usize,
    registry: Arc<RwLock<ObjectRegistry>>,
    room: RwLock<Option<JoinedRoom>>,
    book: Mutex<SyncBook>,
    events: broadcast::Sender<SyncEvent>,
}

impl TransformSync {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        sender_id: SenderId,
        app_root: &StorePath,
        registry: Arc<RwLock<ObjectRegistry>>,
        latency_sample_count: usize,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            store,
            clock,
            sender_id,
            latency_path: app_root.child("stats/latency"),
            latency_sample_count,
            registry,
            room: RwLock::new(None),
            book: Mutex::new(SyncBook {
                last_observed: HashMap::new(),
                initialized: HashSet::new(),
                probe: LatencyProbe::new(latency_sample_count),
            }),
            events,
        }
    }

    pub fn sender_id(&self) -> &SenderId {
        &self.sender_id
    }

    pub async fn bind_room(&self, room: JoinedRoom) {
        *self.room.write().await = Some(room);
    }

    pub async fn unbind_room(&self) {
        self.room.write().await.take();
    }

    /// Forget everything learned in the current room: observed snapshots,
    /// initialization marks and latency samples. Every registered object
    /// goes back to waiting for its first remote state.
    pub async fn reset(&self) {
        {
            let mut book = self.book.lock().await;
            book.last_observed.clear();
            book.initialized.clear();
            book.probe = LatencyProbe::new(self.latency_sample_count);
        }

        let objects: Vec<SharedObject> = self
            .registry
            .read()
            .await
            .all()
            .map(|(_, object)| Arc::clone(object))
            .collect();
        for object in objects {
            object.write().await.user_data.is_sync_initialized = false;
        }
        debug!("Sync state reset");
    }

    pub async fn room(&self) -> Option<JoinedRoom> {
        self.room.read().await.clone()
    }

    pub async fn last_observed(&self, key: &str) -> Option<TransformSnapshot> {
        self.book.lock().await.last_observed.get(key).cloned()
    }

    pub async fn is_initialized(&self, key: &str) -> bool {
        self.book.lock().await.initialized.contains(key)
    }

    /// Snapshot of the object's current state, attributed to this session.
    pub fn snapshot_of(&self, object: &SyncedObject) -> TransformSnapshot {
        TransformSnapshot::new(
            object.transform(),
            self.sender_id.clone(),
            self.clock.now_millis(),
            object.user_data.sync_data.clone(),
        )
    }

    /// Publish the object's current state. Does nothing until a room is bound.
    pub async fn save(&self, object: &SharedObject) {
        let Some(room) = self.room().await else {
            debug!("Room not resolved yet, skipping save");
            return;
        };

        let id = object.read().await.id();
        let key = self
            .registry
            .read()
            .await
            .lookup_key_by_id(id)
            .map(str::to_string);
        let Some(key) = key else {
            error!(%id, "Object not registered, cannot save");
            return;
        };

        self.publish(&room, &key, object).await;
    }

    /// Publish every registered object whose state differs from the last
    /// snapshot observed for it.
    ///
    /// Objects that move every frame always differ, so calling this per frame
    /// for them writes on every call.
    pub async fn save_all_changed(&self) {
        let Some(room) = self.room().await else {
            debug!("Room not resolved yet, skipping save");
            return;
        };

        let objects: Vec<(String, SharedObject)> = self
            .registry
            .read()
            .await
            .all()
            .map(|(key, object)| (key.to_string(), Arc::clone(object)))
            .collect();

        for (key, object) in objects {
            let last = self.last_observed(&key).await;
            let changed = match last {
                None => true,
                Some(snapshot) => !same_object_data(&*object.read().await, &snapshot),
            };
            if changed {
                self.publish(&room, &key, &object).await;
            }
        }
    }

    async fn publish(&self, room: &JoinedRoom, key: &str, object: &SharedObject) {
        let snapshot = self.snapshot_of(&*object.read().await);
        let value = match snapshot.to_value() {
            Ok(value) => value,
            Err(err) => {
                report_store_error("encode snapshot", &err);
                return;
            }
        };

        debug!(key, ?snapshot, "SENT update");
        match self.store.write(&room.slot(key), value).await {
            Ok(()) => {
                let _ = self.events.send(SyncEvent::Published {
                    key: key.to_string(),
                });
            }
            Err(err) => report_store_error("save object", &err),
        }
        log_completion(
            "touch room",
            self.store.write(&room.updated_at(), server_timestamp()).await,
        );
    }

    /// Handle one delivered value of the slot for `key` (`None` while the
    /// slot has never been written).
    pub async fn on_remote_change(&self, key: &str, value: Option<JsonValue>) {
        let object = self.registry.read().await.lookup_by_key(key);
        let Some(object) = object else {
            error!(key, "No object registered for key");
            return;
        };

        let room = self.room().await;

        let Some(value) = value else {
            let Some(room) = room else {
                debug!(key, "Room not resolved yet, cannot bootstrap");
                return;
            };
            info!(key, "No remote state yet, publishing local state");
            self.publish(&room, key, &object).await;
            let _ = self.events.send(SyncEvent::Bootstrapped {
                key: key.to_string(),
            });
            return;
        };

        let path = room
            .as_ref()
            .map(|room| room.slot(key).to_string())
            .unwrap_or_else(|| key.to_string());
        let snapshot = match TransformSnapshot::from_value(&path, value) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                report_store_error("decode snapshot", &err);
                return;
            }
        };

        let origin = Origin::of(&snapshot, &self.sender_id);
        let decision = {
            let mut book = self.book.lock().await;
            book.last_observed.insert(key.to_string(), snapshot.clone());
            let decision = decide(&origin, book.initialized.contains(key));
            if decision == Decision::Initialize {
                book.initialized.insert(key.to_string());
            }
            decision
        };

        if decision.applies() {
            let mut guard = object.write().await;
            apply_snapshot(&mut guard, &snapshot);
            if decision == Decision::Initialize {
                guard.user_data.is_sync_initialized = true;
            }
        }

        match decision {
            Decision::Initialize => {
                debug!(key, sender_id = %snapshot.sender_id, "INIT");
                let _ = self.events.send(SyncEvent::Initialized {
                    key: key.to_string(),
                });
            }
            Decision::ApplyRemote => {
                debug!(key, ?snapshot, "RECV update");
                let _ = self.events.send(SyncEvent::RemoteApplied {
                    key: key.to_string(),
                    sender_id: snapshot.sender_id.clone(),
                });
                self.sample_latency(&snapshot).await;
            }
            Decision::IgnoreEcho => {
                trace!(key, "Ignoring echo of our own write");
                let _ = self.events.send(SyncEvent::EchoIgnored {
                    key: key.to_string(),
                });
            }
        }
    }

    async fn sample_latency(&self, snapshot: &TransformSnapshot) {
        let received_at = self.clock.now_millis();
        let samples = self
            .book
            .lock()
            .await
            .probe
            .observe(snapshot.sent_at, received_at);
        let Some(samples) = samples else {
            return;
        };
        let Some(room) = self.room().await else {
            return;
        };

        let report = LatencyReport::from_samples(
            self.sender_id.clone(),
            room.room_id,
            self.clock.now_millis(),
            samples,
        );
        info!(
            samples = ?report.samples,
            average = report.average,
            "Latency samples collected (ms)"
        );

        match serde_json::to_value(&report) {
            Ok(value) => log_completion(
                "save latency",
                self.store.push(&self.latency_path, value).committed().await,
            ),
            Err(err) => error!(error = %err, "Failed to encode latency report"),
        }
        let _ = self.events.send(SyncEvent::LatencyReported(report));
    }

    /// Subscribe to every registered object's slot and process deliveries
    /// one at a time on a spawned task.
    pub async fn listen(self: Arc<Self>) -> Result<JoinHandle<()>, SyncError> {
        let room = self
            .room()
            .await
            .ok_or_else(|| SyncError::MissingRoomHandle {
                room: String::new(),
            })?;

        let keys: Vec<String> = self
            .registry
            .read()
            .await
            .keys()
            .map(str::to_string)
            .collect();

        let mut subscriptions: StreamMap<String, ValueStream> = StreamMap::new();
        for key in keys {
            let stream = self.store.subscribe(&room.slot(&key));
            subscriptions.insert(key, stream);
        }

        Ok(tokio::spawn(async move {
            while let Some((key, change)) = subscriptions.next().await {
                match change {
                    Ok(value) => self.on_remote_change(&key, value).await,
                    Err(error) => {
                        report_store_error("object subscription", &error);
                        let _ = self
                            .events
                            .send(SyncEvent::SubscriptionCancelled { key, error });
                    }
                }
            }
            debug!("All object subscriptions closed");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreOperation};
    use crate::testing::ManualClock;
    use roomsync_api::{RoomHandle, RoomId, Transform, Vector3};
    use serde_json::json;

    struct Harness {
        store: MemoryStore,
        clock: Arc<ManualClock>,
        sync: Arc<TransformSync>,
        room: JoinedRoom,
        events: broadcast::Receiver<SyncEvent>,
        a: SharedObject,
        b: SharedObject,
    }

    async fn harness() -> Harness {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(10_000));
        let app = StorePath::root().child("demo");
        let registry = Arc::new(RwLock::new(ObjectRegistry::new()));
        let (events_tx, events) = broadcast::channel(64);

        let a = SyncedObject::new().into_shared();
        let b = SyncedObject::new().into_shared();
        {
            let mut registry = registry.write().await;
            registry.register(a.clone(), "a").await.unwrap();
            registry.register(b.clone(), "b").await.unwrap();
        }

        let sync = Arc::new(TransformSync::new(
            Arc::new(store.clone()),
            clock.clone(),
            SenderId::new("user1"),
            &app,
            registry,
            4,
            events_tx,
        ));
        let room = JoinedRoom::new(
            RoomId::new(5).unwrap(),
            RoomHandle::new("-k000000"),
            &app.child("rooms"),
        );

        Harness {
            store,
            clock,
            sync,
            room,
            events,
            a,
            b,
        }
    }

    fn peer_snapshot(x: f64, sent_at: i64) -> JsonValue {
        let transform = Transform {
            position: Vector3::new(x, 0.0, 0.0),
            ..Transform::default()
        };
        TransformSnapshot::new(transform, SenderId::new("user2"), sent_at, None)
            .to_value()
            .unwrap()
    }

    fn writes_to(store: &MemoryStore, path: &StorePath) -> usize {
        let path = path.to_string();
        store
            .operations()
            .iter()
            .filter(|op| matches!(op, StoreOperation::Write { path: p, .. } if *p == path))
            .count()
    }

    fn drain(events: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        seen
    }

    #[tokio::test]
    async fn test_save_before_room_is_noop() {
        let h = harness().await;
        h.sync.save(&h.a).await;
        h.sync.save_all_changed().await;
        assert!(h.store.operations().is_empty());
    }

    #[tokio::test]
    async fn test_save_writes_slot_and_touches_room() {
        let h = harness().await;
        h.sync.bind_room(h.room.clone()).await;
        {
            let mut a = h.a.write().await;
            a.position = Vector3::new(1.0, 2.0, 3.0);
            a.user_data.sync_data = Some(json!({"color": "red"}));
        }

        h.sync.save(&h.a).await;

        let stored = h.store.get(&h.room.slot("a")).unwrap();
        let snapshot = TransformSnapshot::from_value("a", stored).unwrap();
        assert_eq!(snapshot.sender_id, SenderId::new("user1"));
        assert_eq!(snapshot.sent_at, 10_000);
        assert!(same_object_data(&*h.a.read().await, &snapshot));
        assert!(h.store.get(&h.room.updated_at()).unwrap().is_i64());
    }

    #[tokio::test]
    async fn test_save_unregistered_object_is_ignored() {
        let h = harness().await;
        h.sync.bind_room(h.room.clone()).await;
        let stranger = SyncedObject::new().into_shared();

        h.sync.save(&stranger).await;

        assert!(h.store.operations().is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_publishes_once_and_waits_for_echo() {
        let mut h = harness().await;
        h.sync.bind_room(h.room.clone()).await;
        h.a.write().await.position = Vector3::new(4.0, 0.0, 0.0);

        h.sync.on_remote_change("a", None).await;

        assert_eq!(writes_to(&h.store, &h.room.slot("a")), 1);
        assert!(!h.a.read().await.is_sync_initialized());
        assert!(!h.sync.is_initialized("a").await);

        let echo = h.store.get(&h.room.slot("a"));
        h.sync.on_remote_change("a", echo).await;

        assert!(h.a.read().await.is_sync_initialized());
        assert_eq!(h.a.read().await.position, Vector3::new(4.0, 0.0, 0.0));
        assert_eq!(writes_to(&h.store, &h.room.slot("a")), 1);
        assert_eq!(
            drain(&mut h.events),
            vec![
                SyncEvent::Published { key: "a".into() },
                SyncEvent::Bootstrapped { key: "a".into() },
                SyncEvent::Initialized { key: "a".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_own_echo_ignored_after_initialization() {
        let mut h = harness().await;
        h.sync.bind_room(h.room.clone()).await;
        h.sync.on_remote_change("a", Some(peer_snapshot(1.0, 0))).await;
        assert!(h.a.read().await.is_sync_initialized());

        let mut stale = Transform::default();
        stale.position.x = 99.0;
        let echo = TransformSnapshot::new(stale, SenderId::new("user1"), 5, None);
        h.sync.on_remote_change("a", Some(echo.to_value().unwrap())).await;

        assert_eq!(h.a.read().await.position.x, 1.0);
        assert_eq!(h.sync.last_observed("a").await, Some(echo));
        assert_eq!(
            drain(&mut h.events).last(),
            Some(&SyncEvent::EchoIgnored { key: "a".into() })
        );
    }

    #[tokio::test]
    async fn test_own_write_accepted_once_for_initialization() {
        let h = harness().await;
        h.sync.bind_room(h.room.clone()).await;
        let mut seeded = Transform::default();
        seeded.rotation.y = 1.5;
        let own = TransformSnapshot::new(seeded, SenderId::new("user1"), 0, None);

        h.sync.on_remote_change("b", Some(own.to_value().unwrap())).await;

        let b = h.b.read().await;
        assert!(b.is_sync_initialized());
        assert_eq!(b.rotation.y, 1.5);
    }

    #[tokio::test]
    async fn test_peer_update_copies_transform_and_sync_data() {
        let h = harness().await;
        h.sync.bind_room(h.room.clone()).await;
        h.a.write().await.user_data.sync_data = Some(json!({"mine": true}));
        h.sync.on_remote_change("a", Some(peer_snapshot(1.0, 0))).await;

        let update = TransformSnapshot::new(
            Transform {
                position: Vector3::new(2.0, 3.0, 4.0),
                rotation: Vector3::new(0.1, 0.2, 0.3),
                scale: Vector3::new(5.0, 5.0, 5.0),
            },
            SenderId::new("user2"),
            10_000,
            Some(json!({"color": "blue", "nested": {"n": [1, 2]}})),
        );
        h.sync
            .on_remote_change("a", Some(update.to_value().unwrap()))
            .await;

        let a = h.a.read().await;
        assert_eq!(a.transform(), update.transform());
        assert_eq!(a.user_data.sync_data, update.sync_data);
    }

    #[tokio::test]
    async fn test_snapshot_without_sync_data_keeps_local_payload() {
        let h = harness().await;
        h.sync.bind_room(h.room.clone()).await;
        h.a.write().await.user_data.sync_data = Some(json!({"mine": true}));

        h.sync.on_remote_change("a", Some(peer_snapshot(3.0, 0))).await;

        let a = h.a.read().await;
        assert_eq!(a.position.x, 3.0);
        assert_eq!(a.user_data.sync_data, Some(json!({"mine": true})));
    }

    #[tokio::test]
    async fn test_unknown_key_and_bad_value_are_ignored() {
        let mut h = harness().await;
        h.sync.bind_room(h.room.clone()).await;

        h.sync.on_remote_change("ghost", Some(peer_snapshot(1.0, 0))).await;
        h.sync
            .on_remote_change("a", Some(json!({"position": "nowhere"})))
            .await;

        assert!(!h.a.read().await.is_sync_initialized());
        assert!(h.store.operations().is_empty());
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn test_latency_reported_once_after_four_peer_updates() {
        let mut h = harness().await;
        h.sync.bind_room(h.room.clone()).await;
        h.sync.on_remote_change("a", Some(peer_snapshot(0.0, 0))).await;

        for (i, delay) in [30_i64, 10, 50, 21].into_iter().enumerate() {
            let now = h.clock.now_millis();
            h.clock.set(now + 100);
            let sent_at = h.clock.now_millis() - delay;
            h.sync
                .on_remote_change("a", Some(peer_snapshot(i as f64 + 1.0, sent_at)))
                .await;
        }

        let latency = StorePath::root().child("demo/stats/latency");
        let reports = h.store.get(&latency).unwrap();
        let reports = reports.as_object().unwrap();
        assert_eq!(reports.len(), 1);
        let report: LatencyReport =
            serde_json::from_value(reports.values().next().unwrap().clone()).unwrap();
        assert_eq!(report.samples, vec![30, 10, 50, 21]);
        assert_eq!(report.average, 28);
        assert_eq!(report.room_id, RoomId::new(5).unwrap());

        h.sync
            .on_remote_change("a", Some(peer_snapshot(9.0, h.clock.now_millis() - 500)))
            .await;
        let reports_after = h.store.get(&latency).unwrap();
        assert_eq!(reports_after.as_object().unwrap().len(), 1);

        let reported: Vec<_> = drain(&mut h.events)
            .into_iter()
            .filter(|e| matches!(e, SyncEvent::LatencyReported(_)))
            .collect();
        assert_eq!(reported, vec![SyncEvent::LatencyReported(report)]);
    }

    #[tokio::test]
    async fn test_initialization_and_echoes_are_not_sampled() {
        let h = harness().await;
        h.sync.bind_room(h.room.clone()).await;
        h.sync.on_remote_change("a", None).await;
        let echo = h.store.get(&h.room.slot("a"));
        h.sync.on_remote_change("a", echo.clone()).await;
        for _ in 0..5 {
            h.sync.on_remote_change("a", echo.clone()).await;
        }

        assert_eq!(h.store.get(&StorePath::root().child("demo/stats/latency")), None);
    }

    #[tokio::test]
    async fn test_save_all_changed_only_publishes_changed_objects() {
        let h = harness().await;
        h.sync.bind_room(h.room.clone()).await;
        for key in ["a", "b"] {
            h.sync.on_remote_change(key, None).await;
            let echo = h.store.get(&h.room.slot(key));
            h.sync.on_remote_change(key, echo).await;
        }

        h.sync.save_all_changed().await;
        assert_eq!(writes_to(&h.store, &h.room.slot("a")), 1);
        assert_eq!(writes_to(&h.store, &h.room.slot("b")), 1);

        h.b.write().await.scale = Vector3::new(3.0, 3.0, 3.0);
        h.sync.save_all_changed().await;

        assert_eq!(writes_to(&h.store, &h.room.slot("a")), 1);
        assert_eq!(writes_to(&h.store, &h.room.slot("b")), 2);
    }

    #[tokio::test]
    async fn test_save_all_changed_publishes_never_observed_objects() {
        let h = harness().await;
        h.sync.bind_room(h.room.clone()).await;

        h.sync.save_all_changed().await;

        assert_eq!(writes_to(&h.store, &h.room.slot("a")), 1);
        assert_eq!(writes_to(&h.store, &h.room.slot("b")), 1);
    }

    #[tokio::test]
    async fn test_listen_requires_room() {
        let h = harness().await;
        let err = h.sync.clone().listen().await.unwrap_err();
        assert!(matches!(err, SyncError::MissingRoomHandle { .. }));
    }

    #[tokio::test]
    async fn test_reset_returns_objects_to_uninitialized() {
        let h = harness().await;
        h.sync.bind_room(h.room.clone()).await;
        h.sync.on_remote_change("a", Some(peer_snapshot(1.0, 0))).await;
        for delay in [10, 20, 30, 40] {
            let sent_at = h.clock.now_millis() - delay;
            h.sync
                .on_remote_change("a", Some(peer_snapshot(2.0 + delay as f64, sent_at)))
                .await;
        }
        assert!(h.a.read().await.is_sync_initialized());

        h.sync.reset().await;

        assert!(!h.a.read().await.is_sync_initialized());
        assert!(!h.sync.is_initialized("a").await);
        assert_eq!(h.sync.last_observed("a").await, None);

        // First state after the reset initializes again instead of sampling
        h.sync.on_remote_change("a", Some(peer_snapshot(7.0, 0))).await;
        assert!(h.a.read().await.is_sync_initialized());
        assert_eq!(h.a.read().await.position.x, 7.0);

        for delay in [5, 5, 5, 5] {
            let sent_at = h.clock.now_millis() - delay;
            h.sync
                .on_remote_change("a", Some(peer_snapshot(8.0 + delay as f64, sent_at)))
                .await;
        }
        let reports = h
            .store
            .get(&StorePath::root().child("demo/stats/latency"))
            .unwrap();
        assert_eq!(reports.as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_null_sync_data_is_unchanged_after_save() {
        let h = harness().await;
        h.sync.bind_room(h.room.clone()).await;
        h.a.write().await.user_data.sync_data = Some(JsonValue::Null);

        h.sync.save(&h.a).await;
        let echo = h.store.get(&h.room.slot("a"));
        h.sync.on_remote_change("a", echo).await;
        let snapshot = h.sync.last_observed("a").await.unwrap();
        assert!(same_object_data(&*h.a.read().await, &snapshot));

        h.sync.save_all_changed().await;
        h.sync.save_all_changed().await;

        assert_eq!(writes_to(&h.store, &h.room.slot("a")), 1);
    }
}
