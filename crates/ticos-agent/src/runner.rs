//! Startup sequence run once the client is connected: initial attributes,
//! attribute subscriptions, shared-attribute fetch and claiming.

use std::time::Duration;

use anyhow::Context;

use ticos_mqtt::{Channel, DeviceClient, GatewayClient, QoS};

use crate::config::AgentConfig;

/// Bring a connected device client to its steady state.
pub async fn start_device<C: Channel>(client: &DeviceClient<C>, config: &AgentConfig) -> anyhow::Result<()> {
    client.subscribe_to_all_attributes(|changed| {
        tracing::info!(attributes = %serde_json::Value::Object(changed.clone()), "shared attributes updated");
    });

    if !config.attributes.is_empty() {
        client
            .send_attributes(&config.attributes, QoS::AtLeastOnce)
            .await
            .await
            .context("publishing initial attributes")?;
        tracing::info!(count = config.attributes.len(), "initial attributes published");
    }

    if !config.shared_keys.is_empty() {
        let keys: Vec<&str> = config.shared_keys.iter().map(String::as_str).collect();
        client
            .request_attributes(&keys, &[], |result| match result {
                Ok(response) => tracing::info!(
                    shared = ?response.shared,
                    "shared attributes fetched"
                ),
                Err(e) => tracing::warn!(error = %e, "shared attribute request failed"),
            })
            .await;
    }

    if let Some(claim) = &config.claim {
        client
            .claim(&claim.secret_key, Duration::from_millis(claim.duration_ms))
            .await
            .await
            .context("sending claim request")?;
        tracing::info!(duration_ms = claim.duration_ms, "claiming window opened");
    }
    Ok(())
}

/// Announce every configured sub-device and bring each to its steady state.
pub async fn start_gateway<C: Channel>(gateway: &GatewayClient<C>, config: &AgentConfig) -> anyhow::Result<()> {
    gateway.gw_subscribe_to_all_attributes(|update| {
        tracing::info!(
            device = update.device.as_deref().unwrap_or_default(),
            attributes = %serde_json::Value::Object(update.data.clone()),
            "sub-device attributes updated"
        );
    });

    let keys: Vec<&str> = config.shared_keys.iter().map(String::as_str).collect();
    for device in &config.devices {
        let name = device.name.as_str();
        gateway
            .gw_connect_device_with_type(name, device.device_type.as_deref())
            .await
            .with_context(|| format!("connecting sub-device '{name}'"))?
            .await
            .with_context(|| format!("connecting sub-device '{name}'"))?;

        if !config.attributes.is_empty() {
            gateway
                .gw_send_attributes(name, &config.attributes)
                .await
                .await
                .with_context(|| format!("publishing attributes of '{name}'"))?;
        }

        if !keys.is_empty() {
            let device_name = name.to_string();
            gateway
                .gw_request_shared_attributes(name, &keys, move |result| match result {
                    Ok(response) => tracing::info!(
                        device = %device_name,
                        value = ?response.value,
                        values = ?response.values,
                        "shared attributes fetched"
                    ),
                    Err(e) => tracing::warn!(device = %device_name, error = %e, "shared attribute request failed"),
                })
                .await;
        }

        if let Some(claim) = &config.claim {
            gateway
                .gw_claim(name, &claim.secret_key, Duration::from_millis(claim.duration_ms))
                .await
                .await
                .with_context(|| format!("claiming '{name}'"))?;
        }
    }

    tracing::info!(devices = config.devices.len(), "sub-devices connected");
    Ok(())
}
