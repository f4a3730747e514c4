//! JSON value helpers shared by the store and the sync engine
//!
//! - Structural equality for opaque `syncData` payloads
//! - The server timestamp sentinel resolved by the store at commit time

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Key of the server-value sentinel object (`{".sv": "timestamp"}`).
pub const SERVER_VALUE_KEY: &str = ".sv";
const SERVER_VALUE_TIMESTAMP: &str = "timestamp";

/// Deep value equality over JSON-like values.
///
/// Objects compare by key set and per-key value regardless of key order,
/// arrays compare element-wise, and numbers compare numerically so that `1`
/// and `1.0` are equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(key, l)| y.get(key).is_some_and(|r| values_equal(l, r)))
        }
        _ => false,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return a == b;
    }
    x.as_f64() == y.as_f64()
}

/// The server timestamp sentinel as a raw JSON value.
pub fn server_timestamp() -> Value {
    let mut map = serde_json::Map::new();
    map.insert(
        SERVER_VALUE_KEY.to_string(),
        Value::String(SERVER_VALUE_TIMESTAMP.to_string()),
    );
    Value::Object(map)
}

/// Whether `value` is the server timestamp sentinel.
pub fn is_server_timestamp(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.len() == 1
                && map.get(SERVER_VALUE_KEY).and_then(Value::as_str) == Some(SERVER_VALUE_TIMESTAMP)
        }
        _ => false,
    }
}

/// A timestamp field in a stored record.
///
/// Written as `Server` and read back as `Millis` once the store resolved it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Milliseconds since the Unix epoch
    Millis(i64),
    /// Placeholder resolved by the store at commit
    Server {
        #[serde(rename = ".sv")]
        sv: String,
    },
}

impl Timestamp {
    pub fn server() -> Self {
        Timestamp::Server {
            sv: SERVER_VALUE_TIMESTAMP.to_string(),
        }
    }

    pub fn as_millis(&self) -> Option<i64> {
        match self {
            Timestamp::Millis(ms) => Some(*ms),
            Timestamp::Server { .. } => None,
        }
    }
}
