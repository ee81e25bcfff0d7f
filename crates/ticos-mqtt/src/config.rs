use std::time::Duration;

use rumqttc::QoS;
use serde::Deserialize;

use crate::error::{ClientError, ClientResult};

/// MQTT connection configuration, loadable from TOML or environment.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Platform MQTT host.
    pub host: String,
    /// Broker port. Defaults to 1883, or 8883 when TLS is enabled.
    #[serde(default)]
    pub port: Option<u16>,
    /// Device or gateway access token, sent as the MQTT username.
    pub access_token: String,
    /// MQTT client id. A random one is generated when absent.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Connect over TLS.
    #[serde(default)]
    pub use_tls: bool,
    /// Path to the CA certificate (PEM). Required with TLS.
    #[serde(default)]
    pub ca_cert_path: Option<String>,
    /// Path to the client certificate (PEM) for mutual TLS.
    #[serde(default)]
    pub client_cert_path: Option<String>,
    /// Path to the client private key (PEM). When absent the key is read
    /// from `client_cert_path`.
    #[serde(default)]
    pub client_key_path: Option<String>,
    /// Keep-alive interval in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u16,
    /// Upper bound on the transport handshake.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// How long a request waits for the platform's reply.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// QoS used where an operation takes no explicit level (0, 1 or 2).
    #[serde(default = "default_qos")]
    pub default_qos: u8,
}

fn default_keepalive() -> u16 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    10
}

fn default_qos() -> u8 {
    1
}

impl ClientConfig {
    /// Plaintext configuration with default timeouts.
    pub fn new(host: impl Into<String>, port: u16, access_token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: Some(port),
            access_token: access_token.into(),
            client_id: None,
            use_tls: false,
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
            keepalive_secs: default_keepalive(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            default_qos: default_qos(),
        }
    }

    /// Enable TLS with the given CA and optional client certificate.
    pub fn with_tls(
        mut self,
        ca_cert_path: impl Into<String>,
        client_cert_path: Option<String>,
        client_key_path: Option<String>,
    ) -> Self {
        self.use_tls = true;
        self.ca_cert_path = Some(ca_cert_path.into());
        self.client_cert_path = client_cert_path;
        self.client_key_path = client_key_path;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
            .unwrap_or(if self.use_tls { 8883 } else { 1883 })
    }

    /// Configured client id, or a fresh time-ordered one.
    pub fn client_id(&self) -> String {
        match &self.client_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!("ticos-{}", uuid::Uuid::now_v7().simple()),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn qos(&self) -> ClientResult<QoS> {
        qos_from_level(self.default_qos)
    }
}

/// Map a numeric QoS level onto rumqttc's enum.
pub fn qos_from_level(level: u8) -> ClientResult<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ClientError::InvalidArgument(format!(
            "QoS level must be 0, 1 or 2, got {other}"
        ))),
    }
}

/// Runtime behaviour shared by the device and gateway clients.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    pub default_qos: QoS,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(default_request_timeout()),
            default_qos: QoS::AtLeastOnce,
        }
    }
}

impl TryFrom<&ClientConfig> for ClientOptions {
    type Error = ClientError;

    fn try_from(config: &ClientConfig) -> ClientResult<Self> {
        Ok(Self {
            request_timeout: config.request_timeout(),
            default_qos: config.qos()?,
        })
    }
}
