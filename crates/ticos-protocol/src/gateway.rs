//! Gateway envelopes.
//!
//! Gateway uploads wrap a per-device payload in an object keyed by the
//! sub-device name, e.g. `{"Example Name": {"atr1": 1}}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of `v1/gateway/connect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConnect {
    pub device: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
}

/// Body of `v1/gateway/disconnect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDisconnect {
    pub device: String,
}

/// Wrap `payload` in a `{device: payload}` envelope.
pub fn envelope(device: &str, payload: Value) -> Value {
    let mut object = Map::new();
    object.insert(device.to_string(), payload);
    Value::Object(object)
}
