//! Gateway client: one MQTT connection proxying many sub-devices.
//!
//! Sub-devices are addressed by name. A name must be registered with
//! [`GatewayClient::gw_connect_device`] before data can be sent on its
//! behalf; operations for unregistered names fail locally with
//! [`ClientError::UnknownDevice`] and publish nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rumqttc::QoS;
use serde_json::{Map, Value};

use ticos_protocol::gateway::envelope;
use ticos_protocol::topics;
use ticos_protocol::{
    AttributeUpdate, ClaimRequest, DeviceConnect, DeviceDisconnect, GatewayAttributeRequest,
    GatewayAttributeResponse, Telemetry,
};

use crate::channel::{Channel, MqttChannel};
use crate::config::{ClientConfig, ClientOptions};
use crate::core::ClientCore;
use crate::error::{ClientError, ClientResult};
use crate::link::ConnectionState;
use crate::lock;
use crate::promise::Promise;
use crate::subscriptions::{DeviceScope, KeyFilter, SubscriptionId};

/// A sub-device connected through the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSession {
    pub name: String,
    pub device_type: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// Client for a gateway and its sub-devices.
///
/// Cheap to clone; clones share the connection and the session table.
pub struct GatewayClient<C: Channel = MqttChannel> {
    core: Arc<ClientCore<C>>,
    sessions: Arc<Mutex<HashMap<String, DeviceSession>>>,
}

impl<C: Channel> Clone for GatewayClient<C> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            sessions: Arc::clone(&self.sessions),
        }
    }
}

impl GatewayClient<MqttChannel> {
    /// Build a disconnected gateway client. TLS material is loaded here.
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let options = ClientOptions::try_from(config)?;
        let (channel, event_loop) = MqttChannel::new(config)?;
        Ok(Self::from_core(ClientCore::new(channel, event_loop, options)))
    }
}

impl<C: Channel> GatewayClient<C> {
    fn from_core(core: ClientCore<C>) -> Self {
        Self {
            core: Arc::new(core),
            sessions: Arc::default(),
        }
    }

    /// Build a connected client over an externally driven channel.
    pub fn with_channel(channel: C, options: ClientOptions) -> Self {
        Self::from_core(ClientCore::attached(channel, options))
    }

    /// Connect, then subscribe to sub-device attribute updates and
    /// attribute responses.
    pub async fn connect(&self, timeout: Duration) -> ClientResult<()> {
        self.core.connect(timeout).await?;
        let subscribed = self
            .core
            .subscribe_topics(&[topics::GATEWAY_ATTRIBUTES, topics::GATEWAY_ATTRIBUTE_RESPONSE])
            .await;
        if let Err(e) = subscribed {
            let _ = self.disconnect().await;
            return Err(e);
        }
        Ok(())
    }

    /// Disconnect the gateway. Every sub-device session and subscription is
    /// dropped and pending requests fail with [`ClientError::Disconnected`].
    pub async fn disconnect(&self) -> ClientResult<()> {
        let result = self.core.disconnect().await;
        let dropped = {
            let mut sessions = lock(&self.sessions);
            let count = sessions.len();
            sessions.clear();
            count
        };
        if dropped > 0 {
            tracing::debug!(sessions = dropped, "sub-device sessions dropped");
        }
        result
    }

    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    pub fn channel(&self) -> &C {
        self.core.channel()
    }

    pub fn pending_requests(&self) -> usize {
        self.core.pending_requests()
    }

    /// Route an inbound message as if it came from the broker.
    pub fn handle_incoming(&self, topic: &str, payload: &[u8]) {
        self.core.handle_incoming(topic, payload);
    }

    /// Currently connected sub-devices, ordered by name.
    pub fn connected_devices(&self) -> Vec<DeviceSession> {
        let mut devices: Vec<_> = lock(&self.sessions).values().cloned().collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }

    pub fn is_device_connected(&self, name: &str) -> bool {
        lock(&self.sessions).contains_key(name)
    }

    // ── Sub-device lifecycle ──────────────────────────────────

    /// Announce a sub-device to the platform and open its session.
    pub async fn gw_connect_device(&self, name: &str) -> ClientResult<Promise<i32>> {
        self.gw_connect_device_with_type(name, None).await
    }

    /// Like [`gw_connect_device`](Self::gw_connect_device), naming the device
    /// profile the platform should create the device with.
    pub async fn gw_connect_device_with_type(
        &self,
        name: &str,
        device_type: Option<&str>,
    ) -> ClientResult<Promise<i32>> {
        if name.is_empty() {
            return Err(ClientError::InvalidArgument(
                "sub-device name must not be empty".into(),
            ));
        }
        let body = DeviceConnect {
            device: name.to_string(),
            device_type: device_type.map(String::from),
        };
        let delivery = self
            .core
            .publish(topics::GATEWAY_CONNECT, &body, QoS::AtLeastOnce)
            .await?;

        lock(&self.sessions).insert(
            name.to_string(),
            DeviceSession {
                name: name.to_string(),
                device_type: body.device_type,
                connected_at: Utc::now(),
            },
        );
        tracing::info!(device = name, "sub-device connected");
        Ok(delivery)
    }

    /// Tell the platform a sub-device went away and close its session.
    pub async fn gw_disconnect_device(&self, name: &str) -> ClientResult<Promise<i32>> {
        self.require_session(name)?;
        let body = DeviceDisconnect {
            device: name.to_string(),
        };
        let delivery = self
            .core
            .publish(topics::GATEWAY_DISCONNECT, &body, QoS::AtLeastOnce)
            .await?;

        lock(&self.sessions).remove(name);
        tracing::info!(device = name, "sub-device disconnected");
        Ok(delivery)
    }

    fn require_session(&self, name: &str) -> ClientResult<()> {
        if self.is_device_connected(name) {
            Ok(())
        } else {
            Err(ClientError::UnknownDevice(name.to_string()))
        }
    }

    // ── Data on behalf of sub-devices ─────────────────────────

    async fn publish_for(&self, name: &str, topic: &str, payload: Value) -> Promise<i32> {
        if let Err(e) = self.require_session(name) {
            tracing::debug!(device = name, topic, "dropping data for unknown sub-device");
            return Promise::failed(e);
        }
        let body = envelope(name, payload);
        self.core
            .publish(topic, &body, self.core.options().default_qos)
            .await
            .unwrap_or_else(Promise::failed)
    }

    /// Publish client-side attributes of a sub-device.
    pub async fn gw_send_attributes(&self, name: &str, attributes: &Map<String, Value>) -> Promise<i32> {
        self.publish_for(name, topics::GATEWAY_ATTRIBUTES, Value::Object(attributes.clone()))
            .await
    }

    /// Publish telemetry of a sub-device. Always sent as a JSON array.
    pub async fn gw_send_telemetry(&self, name: &str, telemetry: impl Into<Telemetry>) -> Promise<i32> {
        let entries = telemetry.into().into_entries();
        self.publish_for(name, topics::GATEWAY_TELEMETRY, Value::Array(entries))
            .await
    }

    /// Start a claiming window for a sub-device.
    pub async fn gw_claim(&self, name: &str, secret_key: &str, duration: Duration) -> Promise<i32> {
        let claim = ClaimRequest::new(secret_key, duration.as_millis() as u64);
        match serde_json::to_value(&claim) {
            Ok(body) => self.publish_for(name, topics::GATEWAY_CLAIM, body).await,
            Err(e) => Promise::failed(e.into()),
        }
    }

    /// Request shared attribute values of a sub-device.
    pub async fn gw_request_shared_attributes<F>(
        &self,
        name: &str,
        keys: &[&str],
        callback: F,
    ) -> Promise<GatewayAttributeResponse>
    where
        F: FnOnce(ClientResult<GatewayAttributeResponse>) + Send + 'static,
    {
        self.request_attributes(name, false, keys, callback).await
    }

    /// Request client attribute values of a sub-device.
    pub async fn gw_request_client_attributes<F>(
        &self,
        name: &str,
        keys: &[&str],
        callback: F,
    ) -> Promise<GatewayAttributeResponse>
    where
        F: FnOnce(ClientResult<GatewayAttributeResponse>) + Send + 'static,
    {
        self.request_attributes(name, true, keys, callback).await
    }

    async fn request_attributes<F>(
        &self,
        name: &str,
        client: bool,
        keys: &[&str],
        callback: F,
    ) -> Promise<GatewayAttributeResponse>
    where
        F: FnOnce(ClientResult<GatewayAttributeResponse>) + Send + 'static,
    {
        let response = match self.require_session(name) {
            Err(e) => Promise::failed(e),
            Ok(()) => {
                let raw = self
                    .core
                    .request(|id| {
                        if keys.is_empty() {
                            return Err(ClientError::InvalidArgument(
                                "no attribute keys requested".into(),
                            ));
                        }
                        let body = GatewayAttributeRequest::new(id.0, name, client, keys);
                        Ok((
                            topics::GATEWAY_ATTRIBUTE_REQUEST.to_string(),
                            serde_json::to_vec(&body)?,
                        ))
                    })
                    .await;
                raw.map(|value| {
                    serde_json::from_value::<GatewayAttributeResponse>(value).map_err(|e| {
                        ClientError::Protocol(format!("unexpected gateway attribute response: {e}"))
                    })
                })
            }
        };
        response.on_resolve(move |result| callback(result.clone()));
        response
    }

    // ── Subscriptions ─────────────────────────────────────────

    /// Updates of `key` on sub-device `name`, narrowed to that key.
    pub fn gw_subscribe_to_attribute<F>(&self, name: &str, key: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&AttributeUpdate) + Send + Sync + 'static,
    {
        self.core.subscriptions.subscribe(
            DeviceScope::Device(name.to_string()),
            KeyFilter::Key(key.to_string()),
            Arc::new(callback),
        )
    }

    /// Every attribute update of every sub-device.
    pub fn gw_subscribe_to_all_attributes<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&AttributeUpdate) + Send + Sync + 'static,
    {
        self.core
            .subscriptions
            .subscribe(DeviceScope::AnyDevice, KeyFilter::AnyKey, Arc::new(callback))
    }

    /// Every attribute update of sub-device `name`.
    pub fn gw_subscribe_to_all_device_attributes<F>(&self, name: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&AttributeUpdate) + Send + Sync + 'static,
    {
        self.core.subscriptions.subscribe(
            DeviceScope::Device(name.to_string()),
            KeyFilter::AnyKey,
            Arc::new(callback),
        )
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn gw_unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core.subscriptions.unsubscribe(id)
    }
}
