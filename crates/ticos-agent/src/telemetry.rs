//! Periodic uptime telemetry publisher.
//!
//! Sends an uptime sample at a configurable interval so the platform
//! knows the device (or every sub-device of a gateway) is alive.

use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::{self, Instant};

use ticos_mqtt::{Channel, ConnectionState, DeviceClient, GatewayClient, QoS};
use ticos_protocol::TimestampedValues;

/// Current uptime sample, stamped with the wall-clock time.
pub fn sample(start_time: Instant) -> TimestampedValues {
    let mut values = Map::new();
    values.insert(
        "uptime_secs".into(),
        Value::from(start_time.elapsed().as_secs()),
    );
    values.insert(
        "agent_version".into(),
        Value::from(env!("CARGO_PKG_VERSION")),
    );
    TimestampedValues::now(values)
}

/// Run the device telemetry loop, publishing at `interval`.
///
/// Returns once the client is no longer connected; the caller decides
/// whether that ends the process.
pub async fn run_device<C: Channel>(client: &DeviceClient<C>, interval: Duration, start_time: Instant) {
    let mut ticker = time::interval(interval);
    // Skip the first tick (fires immediately).
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if client.state() != ConnectionState::Connected {
            tracing::warn!("client disconnected, stopping telemetry");
            return;
        }

        let sample = sample(start_time);
        match client.send_telemetry(sample, QoS::AtLeastOnce).await.await {
            Ok(_) => tracing::debug!("telemetry sent"),
            Err(e) => tracing::warn!(error = %e, "failed to publish telemetry"),
        }
    }
}

/// Run the gateway telemetry loop: one sample per connected sub-device.
pub async fn run_gateway<C: Channel>(gateway: &GatewayClient<C>, interval: Duration, start_time: Instant) {
    let mut ticker = time::interval(interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if gateway.state() != ConnectionState::Connected {
            tracing::warn!("gateway disconnected, stopping telemetry");
            return;
        }

        let sample = sample(start_time);
        for device in gateway.connected_devices() {
            match gateway.gw_send_telemetry(&device.name, sample.clone()).await.await {
                Ok(_) => tracing::debug!(device = %device.name, "telemetry sent"),
                Err(e) => {
                    tracing::warn!(device = %device.name, error = %e, "failed to publish telemetry")
                }
            }
        }
    }
}
