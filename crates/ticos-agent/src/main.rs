//! Ticos Agent — runs a device or gateway client against the platform.
//!
//! Connects with the configured credentials, publishes its initial
//! attributes, logs attribute updates and reports uptime telemetry until
//! interrupted or the connection drops.

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use ticos_agent::config::{AgentConfig, AgentMode};
use ticos_agent::{runner, telemetry};
use ticos_mqtt::{DeviceClient, GatewayClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ticos-agent starting");

    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/ticos/agent.toml".to_string());

    let config = AgentConfig::from_file(&config_path)?;
    tracing::info!(
        mode = ?config.mode,
        host = %config.mqtt.host,
        port = config.mqtt.port(),
        tls = config.mqtt.use_tls,
        "config loaded"
    );

    let interval = Duration::from_secs(config.telemetry_interval_secs);
    let start_time = tokio::time::Instant::now();

    match config.mode {
        AgentMode::Device => {
            let client = DeviceClient::new(&config.mqtt)?;
            client.connect(config.mqtt.connect_timeout()).await?;
            runner::start_device(&client, &config).await?;
            tracing::info!("ticos-agent ready");

            let lost = tokio::select! {
                () = telemetry::run_device(&client, interval, start_time) => true,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received");
                    false
                }
            };
            client.disconnect().await?;
            if lost {
                anyhow::bail!("connection to platform lost");
            }
        }
        AgentMode::Gateway => {
            let gateway = GatewayClient::new(&config.mqtt)?;
            gateway.connect(config.mqtt.connect_timeout()).await?;
            runner::start_gateway(&gateway, &config).await?;
            tracing::info!("ticos-agent ready");

            let lost = tokio::select! {
                () = telemetry::run_gateway(&gateway, interval, start_time) => true,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received");
                    false
                }
            };
            for device in gateway.connected_devices() {
                if let Err(e) = gateway.gw_disconnect_device(&device.name).await {
                    tracing::warn!(device = %device.name, error = %e, "sub-device disconnect failed");
                }
            }
            gateway.disconnect().await?;
            if lost {
                anyhow::bail!("connection to platform lost");
            }
        }
    }

    tracing::info!("ticos-agent stopped");
    Ok(())
}
