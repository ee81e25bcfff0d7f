//! Inbound message classification for the dispatch task.
//!
//! Parses raw MQTT publishes into typed `Inbound` variants so the client
//! core can route them without topic string matching.

use serde_json::Value;

use ticos_protocol::AttributeUpdate;
use ticos_protocol::topics::{self, InboundTopic};

use crate::correlation::RequestId;
use crate::error::{ClientError, ClientResult};

/// A classified inbound MQTT message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Attribute change for the device itself or a gateway sub-device.
    AttributeUpdate(AttributeUpdate),
    /// Reply to an earlier request. An `"error"` member in the body turns
    /// into [`ClientError::Server`].
    Response {
        request_id: RequestId,
        result: ClientResult<Value>,
    },
    /// Known topic, unusable payload.
    Malformed { topic: String, reason: String },
    /// Topic outside the device API.
    Unknown { topic: String },
}

/// Classify a raw publish.
pub fn classify(topic: &str, payload: &[u8]) -> Inbound {
    let Some(parsed) = topics::parse_topic(topic) else {
        return Inbound::Unknown {
            topic: topic.to_string(),
        };
    };

    let malformed = |reason: String| Inbound::Malformed {
        topic: topic.to_string(),
        reason,
    };

    let body: Value = match serde_json::from_slice(payload) {
        Ok(body) => body,
        Err(e) => return malformed(format!("invalid JSON: {e}")),
    };

    match parsed {
        InboundTopic::DeviceAttributes => match body {
            Value::Object(data) => Inbound::AttributeUpdate(AttributeUpdate::own(data)),
            _ => malformed("attribute update is not an object".into()),
        },
        InboundTopic::DeviceAttributeResponse { request_id } => Inbound::Response {
            request_id: RequestId(request_id),
            result: response_result(body),
        },
        InboundTopic::GatewayAttributes => {
            match serde_json::from_value::<AttributeUpdate>(body) {
                Ok(update) if update.device.is_some() => Inbound::AttributeUpdate(update),
                Ok(_) => malformed("gateway attribute update without device".into()),
                Err(e) => malformed(e.to_string()),
            }
        }
        InboundTopic::GatewayAttributeResponse => match body.get("id").and_then(Value::as_u64) {
            Some(id) => Inbound::Response {
                request_id: RequestId(id),
                result: response_result(body),
            },
            None => malformed("gateway attribute response without numeric id".into()),
        },
    }
}

fn response_result(body: Value) -> ClientResult<Value> {
    match body.get("error") {
        Some(Value::String(message)) => Err(ClientError::Server(message.clone())),
        Some(other) => Err(ClientError::Server(other.to_string())),
        None => Ok(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bytes(v: Value) -> Vec<u8> {
        serde_json::to_vec(&v).unwrap()
    }

    #[test]
    fn classify_device_attribute_update() {
        let msg = classify("v1/devices/me/attributes", &bytes(json!({"attr": "v"})));
        match msg {
            Inbound::AttributeUpdate(update) => {
                assert!(update.device.is_none());
                assert_eq!(update.data["attr"], "v");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn classify_device_response_takes_id_from_topic() {
        let msg = classify(
            "v1/devices/me/attributes/response/3",
            &bytes(json!({"shared": {"attr": "hello"}})),
        );
        assert_eq!(
            msg,
            Inbound::Response {
                request_id: RequestId(3),
                result: Ok(json!({"shared": {"attr": "hello"}})),
            }
        );
    }

    #[test]
    fn classify_error_response() {
        let msg = classify(
            "v1/devices/me/attributes/response/4",
            &bytes(json!({"error": "no such key"})),
        );
        assert_eq!(
            msg,
            Inbound::Response {
                request_id: RequestId(4),
                result: Err(ClientError::Server("no such key".into())),
            }
        );
    }

    #[test]
    fn classify_gateway_update_and_response() {
        let update = classify(
            "v1/gateway/attributes",
            &bytes(json!({"device": "Example Name", "data": {"attr": 1}})),
        );
        assert!(
            matches!(update, Inbound::AttributeUpdate(ref u) if u.device.as_deref() == Some("Example Name"))
        );

        let response = classify(
            "v1/gateway/attributes/response",
            &bytes(json!({"id": 9, "device": "Example Name", "value": "hello"})),
        );
        assert!(matches!(
            response,
            Inbound::Response { request_id: RequestId(9), result: Ok(_) }
        ));
    }

    #[test]
    fn gateway_payloads_missing_fields_are_malformed() {
        let no_device = classify("v1/gateway/attributes", &bytes(json!({"data": {"a": 1}})));
        assert!(matches!(no_device, Inbound::Malformed { .. }));

        let no_id = classify(
            "v1/gateway/attributes/response",
            &bytes(json!({"device": "Example Name", "value": 1})),
        );
        assert!(matches!(no_id, Inbound::Malformed { .. }));
    }

    #[test]
    fn classify_bad_payload() {
        let msg = classify("v1/devices/me/attributes", b"not-json");
        assert!(matches!(msg, Inbound::Malformed { ref reason, .. } if reason.contains("JSON")));

        let msg = classify("v1/devices/me/attributes", &bytes(json!([1, 2])));
        assert!(matches!(msg, Inbound::Malformed { .. }));
    }

    #[test]
    fn classify_unknown_topic() {
        let msg = classify("some/random/topic", b"data");
        assert_eq!(
            msg,
            Inbound::Unknown {
                topic: "some/random/topic".into()
            }
        );
    }

    #[test]
    fn classify_outbound_topic_is_unknown() {
        let msg = classify("v1/devices/me/telemetry", b"{}");
        assert!(matches!(msg, Inbound::Unknown { .. }));
    }
}
