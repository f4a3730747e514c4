//! Remote store abstraction
//!
//! The sync engine only needs a keyed, hierarchical, subscribable store:
//! - `query_equal`: read-once equality query over a collection's children
//! - `write`: replace the value at a path
//! - `push`: append a child under a generated key, key available immediately
//! - `subscribe`: live value of a path, starting with its current state
//!
//! `MemoryStore` is the in-process implementation used by tests and the demo.

pub mod memory;
pub mod path;

pub use memory::{MemoryStore, StoreOperation};
pub use path::StorePath;

use async_trait::async_trait;
use roomsync_api::StoreError;
use serde_json::Value as JsonValue;
use std::pin::Pin;
use tokio::sync::oneshot;
use tokio_stream::Stream;
use tracing::error;

/// Live values of one path: `Ok(None)` while nothing is stored there,
/// `Err` once when the subscription is cancelled.
pub type ValueStream =
    Pin<Box<dyn Stream<Item = Result<Option<JsonValue>, StoreError>> + Send + 'static>>;

/// Result of `RemoteStore::push`: the new child's key is known right away,
/// the write commits later.
#[derive(Debug)]
pub struct PendingPush {
    pub key: String,
    pub path: StorePath,
    ack: oneshot::Receiver<Result<(), StoreError>>,
}

impl PendingPush {
    pub fn new(path: StorePath, ack: oneshot::Receiver<Result<(), StoreError>>) -> Self {
        let key = path.key().unwrap_or_default().to_string();
        Self { key, path, ack }
    }

    /// Wait until the store acknowledged the write.
    pub async fn committed(self) -> Result<(), StoreError> {
        match self.ack.await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Disconnected {
                message: format!("store dropped pending write at {}", self.path),
            }),
        }
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Children of `collection` whose `field` equals `value`, as `(key, value)`
    /// pairs in key order.
    async fn query_equal(
        &self,
        collection: &StorePath,
        field: &str,
        value: &JsonValue,
    ) -> Result<Vec<(String, JsonValue)>, StoreError>;

    /// Replace the value at `path`. Writing `Null` removes it.
    async fn write(&self, path: &StorePath, value: JsonValue) -> Result<(), StoreError>;

    /// Append `value` under a new unique child key of `collection`.
    fn push(&self, collection: &StorePath, value: JsonValue) -> PendingPush;

    /// Subscribe to the value at `path` and every change to its subtree.
    fn subscribe(&self, path: &StorePath) -> ValueStream;
}

/// Uniform reporting path for remote store failures. They are never retried
/// and never escalated.
pub fn report_store_error(operation: &str, err: &StoreError) {
    error!(operation, error = %err, "Remote store operation failed");
}

/// Log-only completion for fire-and-forget writes.
pub fn log_completion(operation: &str, result: Result<(), StoreError>) {
    if let Err(err) = result {
        report_store_error(operation, &err);
    }
}
