//! Agent configuration, loadable from TOML.

use serde::Deserialize;
use serde_json::{Map, Value};
use ticos_mqtt::ClientConfig;

/// Which client role the agent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    #[default]
    Device,
    Gateway,
}

/// Top-level configuration for the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub mode: AgentMode,
    /// MQTT connection settings.
    pub mqtt: ClientConfig,
    /// Uptime telemetry interval in seconds.
    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval_secs: u64,
    /// Client attributes published once after connecting. In gateway mode
    /// they are published for every sub-device.
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Shared attributes fetched once after connecting.
    #[serde(default)]
    pub shared_keys: Vec<String>,
    /// Open a claiming window after connecting.
    #[serde(default)]
    pub claim: Option<ClaimConfig>,
    /// Sub-devices announced in gateway mode.
    #[serde(default)]
    pub devices: Vec<SubDeviceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimConfig {
    pub secret_key: String,
    #[serde(default = "default_claim_duration")]
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubDeviceConfig {
    pub name: String,
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,
}

fn default_telemetry_interval() -> u64 {
    30
}

fn default_claim_duration() -> u64 {
    30_000
}

impl AgentConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.telemetry_interval_secs == 0 {
            anyhow::bail!("telemetry_interval_secs must be positive");
        }
        if self.mode == AgentMode::Gateway && self.devices.is_empty() {
            anyhow::bail!("gateway mode needs at least one [[devices]] entry");
        }
        if let Some(device) = self.devices.iter().find(|d| d.name.is_empty()) {
            anyhow::bail!("sub-device name must not be empty (type {:?})", device.device_type);
        }
        Ok(())
    }
}
