use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of a device attribute request (`v1/devices/me/attributes/request/{id}`).
///
/// Keys are sent as comma-separated lists; an absent list means the key set
/// was not requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_keys: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_keys: Option<String>,
}

impl AttributeRequest {
    pub fn new<S: AsRef<str>>(shared_keys: &[S], client_keys: &[S]) -> Self {
        Self {
            client_keys: join_keys(client_keys),
            shared_keys: join_keys(shared_keys),
        }
    }
}

fn join_keys<S: AsRef<str>>(keys: &[S]) -> Option<String> {
    if keys.is_empty() {
        return None;
    }
    let joined: Vec<&str> = keys.iter().map(AsRef::as_ref).collect();
    Some(joined.join(","))
}

/// Platform reply to a device attribute request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared: Option<Map<String, Value>>,
}

impl AttributeResponse {
    pub fn shared_value(&self, key: &str) -> Option<&Value> {
        self.shared.as_ref().and_then(|m| m.get(key))
    }

    pub fn client_value(&self, key: &str) -> Option<&Value> {
        self.client.as_ref().and_then(|m| m.get(key))
    }
}

/// An attribute change pushed by the platform.
///
/// `device` is `None` for the connected device itself and names the
/// sub-device for gateway updates (`{"device": ..., "data": {...}}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub data: Map<String, Value>,
}

impl AttributeUpdate {
    pub fn own(data: Map<String, Value>) -> Self {
        Self { device: None, data }
    }

    pub fn for_device(device: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            device: Some(device.into()),
            data,
        }
    }

    /// Copy of this update restricted to a single key, if present.
    pub fn narrowed(&self, key: &str) -> Option<Self> {
        let value = self.data.get(key)?;
        let mut data = Map::new();
        data.insert(key.to_string(), value.clone());
        Some(Self {
            device: self.device.clone(),
            data,
        })
    }
}

/// Body of a gateway attribute request (`v1/gateway/attributes/request`).
///
/// A single key is sent as `key`, several as `keys`; the platform answers
/// with `value` or `values` respectively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayAttributeRequest {
    pub id: u64,
    pub device: String,
    /// `true` for client-side attributes, `false` for shared ones.
    pub client: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
}

impl GatewayAttributeRequest {
    pub fn new<S: AsRef<str>>(id: u64, device: &str, client: bool, keys: &[S]) -> Self {
        let (key, keys) = match keys {
            [single] => (Some(single.as_ref().to_string()), None),
            many => (
                None,
                Some(many.iter().map(|k| k.as_ref().to_string()).collect()),
            ),
        };
        Self {
            id,
            device: device.to_string(),
            client,
            key,
            keys,
        }
    }
}

/// Platform reply to a gateway attribute request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayAttributeResponse {
    pub id: u64,
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Map<String, Value>>,
}
