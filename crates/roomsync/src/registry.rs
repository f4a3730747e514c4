//! Local objects and their stable keys
//!
//! Objects are owned by the caller and shared with the sync engine as
//! `Arc<RwLock<SyncedObject>>`. The registry only holds the two-way
//! key mapping, in registration order.

use roomsync_api::{Transform, Vector3};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::SyncError;

/// Object handle shared between the caller and the sync engine
pub type SharedObject = Arc<RwLock<SyncedObject>>;

/// Auxiliary data bag carried by every synced object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserData {
    /// Payload mirrored to peers alongside the transform
    pub sync_data: Option<JsonValue>,
    /// Set once the first remote state for this object has been applied
    pub is_sync_initialized: bool,
    /// Caller-owned entries, never read or synced
    pub extra: Map<String, JsonValue>,
}

/// A transform holder whose state is mirrored across clients.
///
/// Cloning copies the state but not the identity: the clone is a new object
/// that can be registered under its own key.
#[derive(Debug, PartialEq)]
pub struct SyncedObject {
    id: Uuid,
    pub position: Vector3,
    pub rotation: Vector3,
    pub scale: Vector3,
    pub user_data: UserData,
}

impl Clone for SyncedObject {
    fn clone(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            position: self.position,
            rotation: self.rotation,
            scale: self.scale,
            user_data: self.user_data.clone(),
        }
    }
}

impl Default for SyncedObject {
    fn default() -> Self {
        Self::with_transform(Transform::default())
    }
}

impl SyncedObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transform(transform: Transform) -> Self {
        Self {
            id: Uuid::new_v4(),
            position: transform.position,
            rotation: transform.rotation,
            scale: transform.scale,
            user_data: UserData::default(),
        }
    }

    pub fn with_sync_data(mut self, sync_data: JsonValue) -> Self {
        self.user_data.sync_data = Some(sync_data);
        self
    }

    pub fn into_shared(self) -> SharedObject {
        Arc::new(RwLock::new(self))
    }

    /// Identity used for reverse lookups; stable for the object's lifetime.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn transform(&self) -> Transform {
        Transform {
            position: self.position,
            rotation: self.rotation,
            scale: self.scale,
        }
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.position = transform.position;
        self.rotation = transform.rotation;
        self.scale = transform.scale;
    }

    pub fn is_sync_initialized(&self) -> bool {
        self.user_data.is_sync_initialized
    }
}

/// Two-way mapping between object keys and registered objects.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    /// In registration order
    entries: Vec<(String, SharedObject)>,
    index_by_key: HashMap<String, usize>,
    key_by_object: HashMap<Uuid, String>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `object` under `key`.
    ///
    /// Rejects empty keys, keys already in use and objects already registered
    /// under another key. On success the object is flagged as not yet
    /// initialized until its first remote state arrives.
    pub async fn register(&mut self, object: SharedObject, key: &str) -> Result<(), SyncError> {
        if key.is_empty() {
            error!("Object key cannot be empty");
            return Err(SyncError::EmptyKey);
        }
        if self.index_by_key.contains_key(key) {
            error!(key, "Object key already registered");
            return Err(SyncError::DuplicateKey {
                key: key.to_string(),
            });
        }

        let id = {
            let mut guard = object.write().await;
            if let Some(existing) = self.key_by_object.get(&guard.id()) {
                error!(key, existing = %existing, "Object already registered");
                return Err(SyncError::ObjectAlreadyRegistered {
                    key: existing.clone(),
                });
            }
            guard.user_data.is_sync_initialized = false;
            guard.id()
        };

        self.index_by_key.insert(key.to_string(), self.entries.len());
        self.key_by_object.insert(id, key.to_string());
        self.entries.push((key.to_string(), object));
        debug!(key, %id, "Registered object");
        Ok(())
    }

    pub fn lookup_by_key(&self, key: &str) -> Option<SharedObject> {
        self.index_by_key
            .get(key)
            .map(|&index| Arc::clone(&self.entries[index].1))
    }

    pub fn lookup_key_by_id(&self, id: Uuid) -> Option<&str> {
        self.key_by_object.get(&id).map(String::as_str)
    }

    pub fn lookup_key_by_object(&self, object: &SyncedObject) -> Option<&str> {
        self.lookup_key_by_id(object.id())
    }

    /// Registered `(key, object)` pairs in registration order.
    pub fn all(&self) -> impl Iterator<Item = (&str, &SharedObject)> + '_ {
        self.entries.iter().map(|(key, object)| (key.as_str(), object))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
