//! Transform types and the snapshot record published for each synced object

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::room::SenderId;
use crate::value::values_equal;
use crate::StoreError;

fn present(sync_data: Option<&JsonValue>) -> Option<&JsonValue> {
    sync_data.filter(|data| !data.is_null())
}

/// Three numeric components, flattened to `{x, y, z}` on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3::new(0.0, 0.0, 0.0);
    pub const ONE: Vector3 = Vector3::new(1.0, 1.0, 1.0);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Position, rotation (Euler angles) and scale of an object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vector3,
    pub rotation: Vector3,
    pub scale: Vector3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vector3::ZERO,
            rotation: Vector3::ZERO,
            scale: Vector3::ONE,
        }
    }
}

/// Wire record for one object's slot under `<room>/objects/<key>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformSnapshot {
    pub position: Vector3,
    pub rotation: Vector3,
    pub scale: Vector3,
    /// Client that published this snapshot
    pub sender_id: SenderId,
    /// Publish time, milliseconds since the Unix epoch
    pub sent_at: i64,
    /// Copy of the object's auxiliary sync payload, if it has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_data: Option<JsonValue>,
}

impl TransformSnapshot {
    pub fn new(
        transform: Transform,
        sender_id: SenderId,
        sent_at: i64,
        sync_data: Option<JsonValue>,
    ) -> Self {
        Self {
            position: transform.position,
            rotation: transform.rotation,
            scale: transform.scale,
            sender_id,
            sent_at,
            sync_data: sync_data.filter(|data| !data.is_null()),
        }
    }

    pub fn transform(&self) -> Transform {
        Transform {
            position: self.position,
            rotation: self.rotation,
            scale: self.scale,
        }
    }

    /// True iff the transform is component-wise equal, sync data presence
    /// matches and, when both carry sync data, the payloads are structurally
    /// equal. A `null` payload counts as absent. Provenance fields are ignored.
    pub fn matches(&self, transform: &Transform, sync_data: Option<&JsonValue>) -> bool {
        if self.transform() != *transform {
            return false;
        }
        match (present(self.sync_data.as_ref()), present(sync_data)) {
            (None, None) => true,
            (Some(ours), Some(theirs)) => values_equal(ours, theirs),
            _ => false,
        }
    }

    pub fn to_value(&self) -> Result<JsonValue, StoreError> {
        serde_json::to_value(self).map_err(|e| StoreError::InvalidValue {
            path: String::new(),
            message: e.to_string(),
        })
    }

    /// Decode a slot value read from `path`.
    pub fn from_value(path: &str, value: JsonValue) -> Result<Self, StoreError> {
        serde_json::from_value(value).map_err(|e| StoreError::InvalidValue {
            path: path.to_string(),
            message: e.to_string(),
        })
    }
}
