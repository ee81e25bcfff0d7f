//! Shared test harness for E2E integration tests.
//!
//! `Platform` plays the cloud's side of the MQTT contract: it reads what
//! the client published to the shared `MockChannel`, keeps per-device
//! attribute and telemetry state, and answers attribute requests through
//! the client's inbound path, exercising real code across crate
//! boundaries.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};

use ticos_mqtt::mock::PublishedMessage;
use ticos_mqtt::{ClientOptions, DeviceClient, GatewayClient, MockChannel};
use ticos_protocol::topics;
use ticos_protocol::{AttributeRequest, ClaimRequest, GatewayAttributeRequest};

/// Platform-side key of the directly connected device.
pub const OWN: &str = "<own>";

/// What the platform knows about one device.
#[derive(Debug, Clone, Default)]
pub struct DeviceRecord {
    pub connected: bool,
    pub device_type: Option<String>,
    pub shared: Map<String, Value>,
    pub client: Map<String, Value>,
    pub telemetry: Vec<Value>,
    pub claims: Vec<ClaimRequest>,
}

/// In-memory stand-in for the platform.
#[derive(Default)]
pub struct Platform {
    devices: Mutex<HashMap<String, DeviceRecord>>,
    /// Index of the first publish not yet processed.
    cursor: Mutex<usize>,
}

impl Platform {
    pub fn record(&self, device: &str) -> DeviceRecord {
        self.devices
            .lock()
            .unwrap()
            .get(device)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_shared(&self, device: &str, data: &Map<String, Value>) {
        let mut devices = self.devices.lock().unwrap();
        let record = devices.entry(device.to_string()).or_default();
        record.shared.extend(data.clone());
    }

    fn with_record<R>(&self, device: &str, f: impl FnOnce(&mut DeviceRecord) -> R) -> R {
        let mut devices = self.devices.lock().unwrap();
        f(devices.entry(device.to_string()).or_default())
    }

    fn take_new(&self, mqtt: &MockChannel) -> Vec<PublishedMessage> {
        let published = mqtt.published();
        let mut cursor = self.cursor.lock().unwrap();
        let fresh = published[*cursor..].to_vec();
        *cursor = published.len();
        fresh
    }

    /// Apply one publish and return the reply the platform sends, if any.
    fn process(&self, msg: &PublishedMessage) -> Option<(String, Vec<u8>)> {
        let body = msg.json();
        match msg.topic.as_str() {
            topics::DEVICE_ATTRIBUTES => {
                self.with_record(OWN, |r| r.client.extend(object(&body)));
                None
            }
            topics::DEVICE_TELEMETRY => {
                self.with_record(OWN, |r| r.telemetry.push(body));
                None
            }
            topics::DEVICE_CLAIM => {
                let claim: ClaimRequest = serde_json::from_value(body).unwrap();
                self.with_record(OWN, |r| r.claims.push(claim));
                None
            }
            topics::GATEWAY_CONNECT => {
                let device = body["device"].as_str().unwrap().to_string();
                let device_type = body.get("type").and_then(Value::as_str).map(String::from);
                self.with_record(&device, |r| {
                    r.connected = true;
                    r.device_type = device_type;
                });
                None
            }
            topics::GATEWAY_DISCONNECT => {
                let device = body["device"].as_str().unwrap().to_string();
                self.with_record(&device, |r| r.connected = false);
                None
            }
            topics::GATEWAY_ATTRIBUTES => {
                for (device, data) in object(&body) {
                    self.with_record(&device, |r| r.client.extend(object(&data)));
                }
                None
            }
            topics::GATEWAY_TELEMETRY => {
                for (device, entries) in object(&body) {
                    let entries = entries.as_array().cloned().unwrap_or_default();
                    self.with_record(&device, |r| r.telemetry.extend(entries));
                }
                None
            }
            topics::GATEWAY_CLAIM => {
                for (device, claim) in object(&body) {
                    let claim: ClaimRequest = serde_json::from_value(claim).unwrap();
                    self.with_record(&device, |r| r.claims.push(claim));
                }
                None
            }
            topics::GATEWAY_ATTRIBUTE_REQUEST => {
                let request: GatewayAttributeRequest = serde_json::from_value(body).unwrap();
                Some(self.answer_gateway(&request))
            }
            other => {
                let id = other.strip_prefix("v1/devices/me/attributes/request/")?;
                let id: u64 = id.parse().unwrap();
                let request: AttributeRequest = serde_json::from_value(body).unwrap();
                Some(self.answer_device(id, &request))
            }
        }
    }

    fn answer_device(&self, id: u64, request: &AttributeRequest) -> (String, Vec<u8>) {
        let record = self.record(OWN);
        let mut response = Map::new();
        if let Some(keys) = &request.shared_keys {
            response.insert("shared".into(), Value::Object(pick(&record.shared, keys.split(','))));
        }
        if let Some(keys) = &request.client_keys {
            response.insert("client".into(), Value::Object(pick(&record.client, keys.split(','))));
        }
        (
            topics::attribute_response(id),
            serde_json::to_vec(&Value::Object(response)).unwrap(),
        )
    }

    fn answer_gateway(&self, request: &GatewayAttributeRequest) -> (String, Vec<u8>) {
        let record = self.record(&request.device);
        let store = if request.client {
            &record.client
        } else {
            &record.shared
        };
        let reply = match (&request.key, &request.keys) {
            (Some(key), _) => json!({
                "id": request.id,
                "device": request.device,
                "value": store.get(key).cloned().unwrap_or(Value::Null),
            }),
            (None, Some(keys)) => json!({
                "id": request.id,
                "device": request.device,
                "values": pick(store, keys.iter().map(String::as_str)),
            }),
            (None, None) => json!({"id": request.id, "error": "no keys requested"}),
        };
        (
            topics::GATEWAY_ATTRIBUTE_RESPONSE.to_string(),
            serde_json::to_vec(&reply).unwrap(),
        )
    }
}

fn object(value: &Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn pick<'a>(store: &Map<String, Value>, keys: impl Iterator<Item = &'a str>) -> Map<String, Value> {
    keys.filter_map(|k| store.get(k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

/// Build an attribute map from a JSON object literal.
pub fn attrs(value: Value) -> Map<String, Value> {
    object(&value)
}

// ── Device harness ────────────────────────────────────────────

/// A device client wired to the emulated platform.
pub struct DeviceHarness {
    pub mqtt: Arc<MockChannel>,
    pub client: DeviceClient<Arc<MockChannel>>,
    pub platform: Platform,
}

impl DeviceHarness {
    pub fn new() -> Self {
        Self::with_options(ClientOptions::default())
    }

    pub fn with_options(options: ClientOptions) -> Self {
        let mqtt = Arc::new(MockChannel::new());
        let client = DeviceClient::with_channel(Arc::clone(&mqtt), options);
        Self {
            mqtt,
            client,
            platform: Platform::default(),
        }
    }

    /// Process everything published since the last call and deliver the
    /// platform's replies. Returns how many replies were delivered.
    pub fn sync(&self) -> usize {
        let mut delivered = 0;
        for msg in self.platform.take_new(&self.mqtt) {
            if let Some((topic, payload)) = self.platform.process(&msg) {
                self.client.handle_incoming(&topic, &payload);
                delivered += 1;
            }
        }
        delivered
    }

    /// Change shared attributes on the platform and push the update.
    pub fn push_shared(&self, data: Value) {
        let data = object(&data);
        self.platform.set_shared(OWN, &data);
        self.client.handle_incoming(
            topics::DEVICE_ATTRIBUTES,
            &serde_json::to_vec(&data).unwrap(),
        );
    }
}

// ── Gateway harness ───────────────────────────────────────────

/// A gateway client wired to the emulated platform.
pub struct GatewayHarness {
    pub mqtt: Arc<MockChannel>,
    pub gateway: GatewayClient<Arc<MockChannel>>,
    pub platform: Platform,
}

impl GatewayHarness {
    pub fn new() -> Self {
        let mqtt = Arc::new(MockChannel::new());
        let gateway = GatewayClient::with_channel(Arc::clone(&mqtt), ClientOptions::default());
        Self {
            mqtt,
            gateway,
            platform: Platform::default(),
        }
    }

    pub fn sync(&self) -> usize {
        let mut delivered = 0;
        for msg in self.platform.take_new(&self.mqtt) {
            if let Some((topic, payload)) = self.platform.process(&msg) {
                self.gateway.handle_incoming(&topic, &payload);
                delivered += 1;
            }
        }
        delivered
    }

    /// Change shared attributes of a sub-device and push the update.
    pub fn push_shared(&self, device: &str, data: Value) {
        let data = object(&data);
        self.platform.set_shared(device, &data);
        let update = json!({"device": device, "data": data});
        self.gateway.handle_incoming(
            topics::GATEWAY_ATTRIBUTES,
            &serde_json::to_vec(&update).unwrap(),
        );
    }
}
