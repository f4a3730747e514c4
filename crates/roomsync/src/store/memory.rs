//! In-memory implementation of RemoteStore
//!
//! A JSON tree behind a mutex. Writes resolve server timestamps, notify
//! overlapping subscribers whose observed value changed, and are recorded in
//! an operation log so tests can assert on store interaction.

use async_trait::async_trait;
use roomsync_api::{is_server_timestamp, values_equal, StoreError};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

use super::{PendingPush, RemoteStore, StorePath, ValueStream};

type SubscriberSender = mpsc::UnboundedSender<Result<Option<JsonValue>, StoreError>>;

/// One store interaction, as seen by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreOperation {
    Query {
        path: String,
        field: String,
        value: JsonValue,
    },
    Write {
        path: String,
        value: JsonValue,
    },
    Push {
        path: String,
        key: String,
        value: JsonValue,
    },
    Subscribe {
        path: String,
    },
}

/// In-memory store shared between clients.
///
/// Cloning yields another handle onto the same tree, which is how several
/// in-process clients talk to "the same server".
///
/// # Example
///
/// ```rust,no_run
/// use roomsync::store::{MemoryStore, RemoteStore, StorePath};
///
/// async fn example() -> anyhow::Result<()> {
///     let store = MemoryStore::new();
///     let slot = StorePath::root().child("demo/rooms/-k000000/objects/a");
///     store.write(&slot, serde_json::json!({"x": 1})).await?;
///     assert!(store.get(&slot).is_some());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug)]
struct Subscriber {
    path: StorePath,
    last: Option<JsonValue>,
    tx: SubscriberSender,
}

#[derive(Debug)]
struct MemoryState {
    root: JsonValue,
    /// Counter for deterministic push keys
    next_push_id: u64,
    subscribers: Vec<Subscriber>,
    operations: Vec<StoreOperation>,
    fail_writes: bool,
    fail_queries: bool,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            root: JsonValue::Object(Map::new()),
            next_push_id: 0,
            subscribers: Vec::new(),
            operations: Vec::new(),
            fail_writes: false,
            fail_queries: false,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current value at `path`.
    pub fn get(&self, path: &StorePath) -> Option<JsonValue> {
        let state = self.lock();
        value_at(&state.root, path.segments())
    }

    /// Every interaction since the store was created, oldest first.
    pub fn operations(&self) -> Vec<StoreOperation> {
        self.lock().operations.clone()
    }

    /// Make subsequent writes and pushes fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Make subsequent queries fail.
    pub fn set_fail_queries(&self, fail: bool) {
        self.lock().fail_queries = fail;
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|s| !s.tx.is_closed());
        state.subscribers.len()
    }

    /// Cancel every subscription at or below `path`, delivering one error to each.
    pub fn cancel_subscriptions(&self, path: &StorePath, message: &str) {
        let mut state = self.lock();
        state.subscribers.retain(|sub| {
            if !path.contains(&sub.path) {
                return true;
            }
            let _ = sub.tx.send(Err(StoreError::SubscriptionCancelled {
                path: sub.path.to_string(),
                message: message.to_string(),
            }));
            false
        });
    }

    fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Apply a write and notify subscribers. Caller holds the lock.
    fn apply_write(
        state: &mut MemoryState,
        path: &StorePath,
        mut value: JsonValue,
    ) -> Result<(), StoreError> {
        if state.fail_writes {
            return Err(StoreError::WriteFailed {
                path: path.to_string(),
                message: "writes are disabled".to_string(),
            });
        }

        resolve_server_values(&mut value, Self::now_millis());
        set_value_at(&mut state.root, path.segments(), value);
        trace!(%path, "MemoryStore applied write");

        Self::notify_subscribers(state, path);
        Ok(())
    }

    /// Send the new value to every overlapping subscriber whose view changed.
    /// Removes closed channels automatically.
    fn notify_subscribers(state: &mut MemoryState, written: &StorePath) {
        let root = &state.root;
        state.subscribers.retain_mut(|sub| {
            if !sub.path.overlaps(written) {
                return !sub.tx.is_closed();
            }
            let current = value_at(root, sub.path.segments());
            if current == sub.last {
                return !sub.tx.is_closed();
            }
            sub.last = current.clone();
            sub.tx.send(Ok(current)).is_ok()
        });
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn query_equal(
        &self,
        collection: &StorePath,
        field: &str,
        value: &JsonValue,
    ) -> Result<Vec<(String, JsonValue)>, StoreError> {
        let mut state = self.lock();
        state.operations.push(StoreOperation::Query {
            path: collection.to_string(),
            field: field.to_string(),
            value: value.clone(),
        });

        if state.fail_queries {
            return Err(StoreError::QueryFailed {
                path: collection.to_string(),
                message: "queries are disabled".to_string(),
            });
        }

        let mut matches: Vec<(String, JsonValue)> = match value_at(&state.root, collection.segments())
        {
            Some(JsonValue::Object(children)) => children
                .into_iter()
                .filter(|(_, child)| child.get(field).is_some_and(|v| values_equal(v, value)))
                .collect(),
            _ => Vec::new(),
        };
        matches.sort_by(|a, b| a.0.cmp(&b.0));

        debug!(%collection, field, matches = matches.len(), "MemoryStore query");
        Ok(matches)
    }

    async fn write(&self, path: &StorePath, value: JsonValue) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.operations.push(StoreOperation::Write {
            path: path.to_string(),
            value: value.clone(),
        });
        Self::apply_write(&mut state, path, value)
    }

    fn push(&self, collection: &StorePath, value: JsonValue) -> PendingPush {
        let mut state = self.lock();
        let key = format!("-k{:06}", state.next_push_id);
        state.next_push_id += 1;

        let path = collection.child(&key);
        state.operations.push(StoreOperation::Push {
            path: collection.to_string(),
            key,
            value: value.clone(),
        });

        let (ack_tx, ack_rx) = oneshot::channel();
        let _ = ack_tx.send(Self::apply_write(&mut state, &path, value));
        PendingPush::new(path, ack_rx)
    }

    fn subscribe(&self, path: &StorePath) -> ValueStream {
        let mut state = self.lock();
        state.operations.push(StoreOperation::Subscribe {
            path: path.to_string(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let current = value_at(&state.root, path.segments());
        let _ = tx.send(Ok(current.clone()));
        state.subscribers.push(Subscriber {
            path: path.clone(),
            last: current,
            tx,
        });

        Box::pin(UnboundedReceiverStream::new(rx))
    }
}

/// Null and empty objects count as "nothing stored".
fn is_absent(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn value_at(root: &JsonValue, segments: &[String]) -> Option<JsonValue> {
    let mut node = root;
    for segment in segments {
        node = node.get(segment)?;
    }
    if is_absent(node) {
        None
    } else {
        Some(node.clone())
    }
}

/// Replace the node at `segments`, creating intermediate objects and pruning
/// parents left empty by a removal.
fn set_value_at(node: &mut JsonValue, segments: &[String], value: JsonValue) {
    let Some((first, rest)) = segments.split_first() else {
        *node = if is_absent(&value) {
            JsonValue::Object(Map::new())
        } else {
            value
        };
        return;
    };

    if !node.is_object() {
        *node = JsonValue::Object(Map::new());
    }
    let JsonValue::Object(map) = node else {
        return;
    };

    if rest.is_empty() {
        if is_absent(&value) {
            map.remove(first);
        } else {
            map.insert(first.clone(), value);
        }
        return;
    }

    let child = map.entry(first.clone()).or_insert(JsonValue::Null);
    set_value_at(child, rest, value);
    if is_absent(child) {
        map.remove(first);
    }
}

fn resolve_server_values(value: &mut JsonValue, now: i64) {
    if is_server_timestamp(value) {
        *value = JsonValue::from(now);
        return;
    }
    match value {
        JsonValue::Object(map) => map
            .values_mut()
            .for_each(|child| resolve_server_values(child, now)),
        JsonValue::Array(items) => items
            .iter_mut()
            .for_each(|child| resolve_server_values(child, now)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomsync_api::server_timestamp;
    use serde_json::json;
    use tokio_stream::StreamExt;

    fn rooms() -> StorePath {
        StorePath::root().child("demo/rooms")
    }

    #[tokio::test]
    async fn test_write_then_get() {
        let store = MemoryStore::new();
        let path = rooms().child("-k000000/objects/a");

        store.write(&path, json!({"x": 1})).await.unwrap();

        assert_eq!(store.get(&path), Some(json!({"x": 1})));
        assert_eq!(
            store.get(&rooms()),
            Some(json!({"-k000000": {"objects": {"a": {"x": 1}}}}))
        );
    }

    #[tokio::test]
    async fn test_null_write_removes_and_prunes() {
        let store = MemoryStore::new();
        let path = rooms().child("-k000000/objects/a");
        store.write(&path, json!(1)).await.unwrap();

        store.write(&path, JsonValue::Null).await.unwrap();

        assert_eq!(store.get(&path), None);
        assert_eq!(store.get(&rooms()), None);
    }

    #[tokio::test]
    async fn test_server_timestamp_resolved_on_commit() {
        let store = MemoryStore::new();
        let path = rooms().child("-k000000");
        let before = chrono::Utc::now().timestamp_millis();

        store
            .write(&path, json!({"createdAt": server_timestamp(), "roomId": "room1"}))
            .await
            .unwrap();

        let created_at = store.get(&path).unwrap()["createdAt"].as_i64().unwrap();
        assert!(created_at >= before);
    }

    #[tokio::test]
    async fn test_push_keys_are_unique_and_ordered() {
        let store = MemoryStore::new();
        let first = store.push(&rooms(), json!({"roomId": "room1"}));
        let second = store.push(&rooms(), json!({"roomId": "room2"}));

        assert!(first.key < second.key);
        assert_eq!(first.path, rooms().child(&first.key));
        first.committed().await.unwrap();
        second.committed().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_equal_filters_children() {
        let store = MemoryStore::new();
        store.push(&rooms(), json!({"roomId": "room1"})).committed().await.unwrap();
        let wanted = store.push(&rooms(), json!({"roomId": "room2"}));
        let wanted_key = wanted.key.clone();
        wanted.committed().await.unwrap();

        let matches = store
            .query_equal(&rooms(), "roomId", &json!("room2"))
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0, wanted_key);

        let none = store
            .query_equal(&rooms(), "roomId", &json!("room3"))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_delivers_initial_state_then_changes() {
        let store = MemoryStore::new();
        let slot = rooms().child("-k000000/objects/a");
        let mut stream = store.subscribe(&slot);

        assert_eq!(stream.next().await, Some(Ok(None)));

        store.write(&slot, json!({"v": 1})).await.unwrap();
        assert_eq!(stream.next().await, Some(Ok(Some(json!({"v": 1})))));

        // A write to an unrelated sibling does not notify
        store
            .write(&rooms().child("-k000000/updatedAt"), json!(5))
            .await
            .unwrap();
        store.write(&slot, json!({"v": 2})).await.unwrap();
        assert_eq!(stream.next().await, Some(Ok(Some(json!({"v": 2})))));
    }

    #[tokio::test]
    async fn test_ancestor_write_notifies_descendant_subscriber() {
        let store = MemoryStore::new();
        let slot = rooms().child("-k000000/objects/a");
        let mut stream = store.subscribe(&slot);
        assert_eq!(stream.next().await, Some(Ok(None)));

        store
            .write(&rooms().child("-k000000"), json!({"objects": {"a": 7}}))
            .await
            .unwrap();

        assert_eq!(stream.next().await, Some(Ok(Some(json!(7)))));
    }

    #[tokio::test]
    async fn test_failed_write_reports_error_and_keeps_state() {
        let store = MemoryStore::new();
        let path = rooms().child("x");
        store.set_fail_writes(true);

        let err = store.write(&path, json!(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::WriteFailed { .. }));
        assert_eq!(store.get(&path), None);

        let pending = store.push(&rooms(), json!({"roomId": "room1"}));
        assert!(pending.committed().await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_delivers_error() {
        let store = MemoryStore::new();
        let slot = rooms().child("-k000000/objects/a");
        let mut stream = store.subscribe(&slot);
        assert_eq!(stream.next().await, Some(Ok(None)));

        store.cancel_subscriptions(&rooms(), "permission revoked");

        assert!(matches!(
            stream.next().await,
            Some(Err(StoreError::SubscriptionCancelled { .. }))
        ));
        assert_eq!(stream.next().await, None);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_operations_are_logged() {
        let store = MemoryStore::new();
        let _ = store.subscribe(&rooms());
        let _ = store.query_equal(&rooms(), "roomId", &json!("room1")).await;

        let ops = store.operations();
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0], StoreOperation::Subscribe { .. }));
        assert!(matches!(ops[1], StoreOperation::Query { .. }));
    }
}
