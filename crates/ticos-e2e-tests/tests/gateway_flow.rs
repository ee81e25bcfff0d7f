//! E2E tests for the gateway client against the emulated platform.

mod helpers;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use helpers::{GatewayHarness, attrs};
use ticos_mqtt::ClientError;
use ticos_protocol::{AttributeUpdate, TimestampedValues};

const DEVICE: &str = "Example Name";

async fn connected(name: &str) -> GatewayHarness {
    let h = GatewayHarness::new();
    h.gateway.gw_connect_device(name).await.unwrap().await.unwrap();
    h.sync();
    h
}

/// Connecting registers the sub-device on both sides; disconnecting
/// removes it again.
#[tokio::test]
async fn e2e_sub_device_lifecycle() {
    let h = GatewayHarness::new();
    h.gateway
        .gw_connect_device_with_type("Meter B", Some("meter"))
        .await
        .unwrap()
        .await
        .unwrap();
    h.gateway.gw_connect_device(DEVICE).await.unwrap().await.unwrap();
    h.sync();

    let names: Vec<_> = h
        .gateway
        .connected_devices()
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert_eq!(names, [DEVICE, "Meter B"]);
    let meter = h.platform.record("Meter B");
    assert!(meter.connected);
    assert_eq!(meter.device_type.as_deref(), Some("meter"));

    h.gateway.gw_disconnect_device("Meter B").await.unwrap().await.unwrap();
    h.sync();
    assert!(!h.gateway.is_device_connected("Meter B"));
    assert!(!h.platform.record("Meter B").connected);
}

/// Telemetry and attributes land on the right platform record.
#[tokio::test]
async fn e2e_sub_device_data() {
    let h = connected(DEVICE).await;

    h.gateway
        .gw_send_telemetry(DEVICE, attrs(json!({"temperature": 21})))
        .await
        .await
        .unwrap();
    h.gateway
        .gw_send_telemetry(
            DEVICE,
            vec![
                TimestampedValues::new(1_700_000_000_000, attrs(json!({"temperature": 22}))),
                TimestampedValues::new(1_700_000_001_000, attrs(json!({"temperature": 23}))),
            ],
        )
        .await
        .await
        .unwrap();
    h.gateway
        .gw_send_attributes(DEVICE, &attrs(json!({"fw": "1.2"})))
        .await
        .await
        .unwrap();
    h.gateway
        .gw_claim(DEVICE, "SECRET", Duration::from_secs(30))
        .await
        .await
        .unwrap();
    h.sync();

    let record = h.platform.record(DEVICE);
    assert_eq!(
        record.telemetry,
        [
            json!({"temperature": 21}),
            json!({"ts": 1_700_000_000_000_i64, "values": {"temperature": 22}}),
            json!({"ts": 1_700_000_001_000_i64, "values": {"temperature": 23}}),
        ]
    );
    assert_eq!(record.client["fw"], "1.2");
    assert_eq!(record.claims[0].duration_ms, 30_000);
}

/// A single key is answered with `value`, several keys with `values`.
#[tokio::test]
async fn e2e_request_shared_attributes() {
    let h = connected(DEVICE).await;
    h.platform
        .set_shared(DEVICE, &attrs(json!({"mode": "eco", "target": 20, "hidden": 1})));

    let single = h
        .gateway
        .gw_request_shared_attributes(DEVICE, &["mode"], |_| {})
        .await;
    let many = h
        .gateway
        .gw_request_shared_attributes(DEVICE, &["mode", "target"], |_| {})
        .await;
    assert_eq!(h.gateway.pending_requests(), 2);
    assert_eq!(h.sync(), 2);
    assert_eq!(h.gateway.pending_requests(), 0);

    let single = single.await.unwrap();
    assert_eq!(single.device, DEVICE);
    assert_eq!(single.value, Some(json!("eco")));

    let many = many.await.unwrap();
    assert_eq!(many.values, Some(attrs(json!({"mode": "eco", "target": 20}))));
}

/// Client attribute requests read back what the gateway uploaded.
#[tokio::test]
async fn e2e_request_client_attributes() {
    let h = connected(DEVICE).await;
    h.gateway
        .gw_send_attributes(DEVICE, &attrs(json!({"serial": "SN-1"})))
        .await
        .await
        .unwrap();

    let outcome = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&outcome);
    let promise = h
        .gateway
        .gw_request_client_attributes(DEVICE, &["serial"], move |result| {
            *sink.lock().unwrap() = Some(result);
        })
        .await;
    h.sync();

    let response = promise.await.unwrap();
    assert_eq!(response.value, Some(json!("SN-1")));
    assert_eq!(*outcome.lock().unwrap(), Some(Ok(response)));
}

/// Subscriptions see only the devices and keys they asked for.
#[tokio::test]
async fn e2e_attribute_update_scopes() {
    let h = connected(DEVICE).await;
    h.gateway.gw_connect_device("Other").await.unwrap();

    let seen: Arc<Mutex<Vec<(&'static str, AttributeUpdate)>>> = Arc::default();
    let record = |tag: &'static str| {
        let seen = Arc::clone(&seen);
        move |u: &AttributeUpdate| seen.lock().unwrap().push((tag, u.clone()))
    };
    h.gateway.gw_subscribe_to_attribute(DEVICE, "mode", record("key"));
    h.gateway.gw_subscribe_to_all_device_attributes(DEVICE, record("device"));
    h.gateway.gw_subscribe_to_all_attributes(record("any"));

    h.push_shared(DEVICE, json!({"mode": "eco", "target": 19}));
    h.push_shared("Other", json!({"mode": "off"}));

    let seen = seen.lock().unwrap();
    let tags: Vec<_> = seen
        .iter()
        .map(|(tag, u)| (*tag, u.device.clone().unwrap()))
        .collect();
    assert_eq!(
        tags,
        [
            ("key", DEVICE.to_string()),
            ("device", DEVICE.to_string()),
            ("any", DEVICE.to_string()),
            ("any", "Other".to_string()),
        ]
    );
    assert_eq!(seen[0].1.data, attrs(json!({"mode": "eco"})));
    assert_eq!(seen[1].1.data, attrs(json!({"mode": "eco", "target": 19})));
}

/// Data for a device that was never connected is refused locally.
#[tokio::test]
async fn e2e_unknown_device_publishes_nothing() {
    let h = GatewayHarness::new();

    let sent = h
        .gateway
        .gw_send_telemetry("Ghost", attrs(json!({"t": 1})))
        .await;
    assert_eq!(sent.await, Err(ClientError::UnknownDevice("Ghost".into())));

    let requested = h
        .gateway
        .gw_request_shared_attributes("Ghost", &["mode"], |_| {})
        .await;
    assert_eq!(
        requested.await,
        Err(ClientError::UnknownDevice("Ghost".into()))
    );

    assert_eq!(
        h.gateway.gw_disconnect_device("Ghost").await.unwrap_err(),
        ClientError::UnknownDevice("Ghost".into())
    );
    assert!(h.mqtt.published().is_empty());
    assert_eq!(h.gateway.pending_requests(), 0);
}

/// Closing the gateway drops every sub-device session.
#[tokio::test]
async fn e2e_disconnect_clears_sessions() {
    let h = connected(DEVICE).await;
    h.gateway.gw_connect_device("Meter B").await.unwrap();
    assert_eq!(h.gateway.connected_devices().len(), 2);

    h.gateway.disconnect().await.unwrap();
    assert!(h.gateway.connected_devices().is_empty());
    assert_eq!(h.mqtt.disconnect_count(), 1);
}
