//! MQTT topic names, builders and parsers for the platform's device API.
//!
//! Topic structure:
//! ```text
//! v1/devices/me/telemetry
//! v1/devices/me/attributes
//! v1/devices/me/attributes/request/{id}
//! v1/devices/me/attributes/response/{id}
//! v1/devices/me/claim
//! v1/gateway/connect
//! v1/gateway/disconnect
//! v1/gateway/telemetry
//! v1/gateway/attributes
//! v1/gateway/attributes/request
//! v1/gateway/attributes/response
//! v1/gateway/claim
//! ```

const DEVICE_PREFIX: &str = "v1/devices/me";
const GATEWAY_PREFIX: &str = "v1/gateway";

// ─── Device topics ───

pub const DEVICE_TELEMETRY: &str = "v1/devices/me/telemetry";
pub const DEVICE_ATTRIBUTES: &str = "v1/devices/me/attributes";
pub const DEVICE_CLAIM: &str = "v1/devices/me/claim";

/// Subscription filter matching every attribute response for this device.
pub const DEVICE_ATTRIBUTE_RESPONSES: &str = "v1/devices/me/attributes/response/+";

pub fn attribute_request(request_id: u64) -> String {
    format!("{DEVICE_PREFIX}/attributes/request/{request_id}")
}

pub fn attribute_response(request_id: u64) -> String {
    format!("{DEVICE_PREFIX}/attributes/response/{request_id}")
}

// ─── Gateway topics ───

pub const GATEWAY_CONNECT: &str = "v1/gateway/connect";
pub const GATEWAY_DISCONNECT: &str = "v1/gateway/disconnect";
pub const GATEWAY_TELEMETRY: &str = "v1/gateway/telemetry";
pub const GATEWAY_ATTRIBUTES: &str = "v1/gateway/attributes";
pub const GATEWAY_ATTRIBUTE_REQUEST: &str = "v1/gateway/attributes/request";
pub const GATEWAY_ATTRIBUTE_RESPONSE: &str = "v1/gateway/attributes/response";
pub const GATEWAY_CLAIM: &str = "v1/gateway/claim";

// ─── Topic parsing ───

/// An inbound topic the client knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTopic {
    /// Shared attribute change pushed to this device.
    DeviceAttributes,
    /// Reply to `attribute_request(id)`.
    DeviceAttributeResponse { request_id: u64 },
    /// Shared attribute change pushed to a gateway sub-device.
    GatewayAttributes,
    /// Reply to a gateway attribute request (id is in the payload).
    GatewayAttributeResponse,
}

/// Parse an inbound topic.
///
/// Returns `None` for topics outside the device API, and for attribute
/// responses whose trailing id is not a number.
pub fn parse_topic(topic: &str) -> Option<InboundTopic> {
    if let Some(rest) = topic.strip_prefix(DEVICE_PREFIX) {
        return match rest {
            "/attributes" => Some(InboundTopic::DeviceAttributes),
            _ => rest
                .strip_prefix("/attributes/response/")
                .and_then(|id| id.parse().ok())
                .map(|request_id| InboundTopic::DeviceAttributeResponse { request_id }),
        };
    }

    match topic.strip_prefix(GATEWAY_PREFIX)? {
        "/attributes" => Some(InboundTopic::GatewayAttributes),
        "/attributes/response" => Some(InboundTopic::GatewayAttributeResponse),
        _ => None,
    }
}
