//! Device client: one endpoint talking to the platform on its own behalf.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::QoS;
use serde_json::{Map, Value};

use ticos_protocol::topics;
use ticos_protocol::{AttributeRequest, AttributeResponse, AttributeUpdate, ClaimRequest, Telemetry};

use crate::channel::{Channel, MqttChannel};
use crate::config::{ClientConfig, ClientOptions};
use crate::core::ClientCore;
use crate::error::{ClientError, ClientResult};
use crate::link::ConnectionState;
use crate::promise::Promise;
use crate::subscriptions::{DeviceScope, KeyFilter, SubscriptionId};

/// Client for a single device.
///
/// Cheap to clone; clones share the connection. Data operations never fail
/// synchronously: local errors (not connected, serialization) resolve the
/// returned [`Promise`].
pub struct DeviceClient<C: Channel = MqttChannel> {
    core: Arc<ClientCore<C>>,
}

impl<C: Channel> Clone for DeviceClient<C> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl DeviceClient<MqttChannel> {
    /// Build a disconnected client. TLS material is loaded here.
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let options = ClientOptions::try_from(config)?;
        let (channel, event_loop) = MqttChannel::new(config)?;
        Ok(Self {
            core: Arc::new(ClientCore::new(channel, event_loop, options)),
        })
    }
}

impl<C: Channel> DeviceClient<C> {
    /// Build a connected client over an externally driven channel. Inbound
    /// traffic must be fed through [`handle_incoming`](Self::handle_incoming).
    pub fn with_channel(channel: C, options: ClientOptions) -> Self {
        Self {
            core: Arc::new(ClientCore::attached(channel, options)),
        }
    }

    /// Connect, then subscribe to attribute updates and responses.
    pub async fn connect(&self, timeout: Duration) -> ClientResult<()> {
        self.core.connect(timeout).await?;
        let subscribed = self
            .core
            .subscribe_topics(&[topics::DEVICE_ATTRIBUTES, topics::DEVICE_ATTRIBUTE_RESPONSES])
            .await;
        if let Err(e) = subscribed {
            let _ = self.core.disconnect().await;
            return Err(e);
        }
        Ok(())
    }

    /// Disconnect. Pending requests fail with [`ClientError::Disconnected`]
    /// and every attribute subscription is dropped.
    pub async fn disconnect(&self) -> ClientResult<()> {
        self.core.disconnect().await
    }

    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    pub fn channel(&self) -> &C {
        self.core.channel()
    }

    /// Number of attribute requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.core.pending_requests()
    }

    /// Route an inbound message as if it came from the broker.
    pub fn handle_incoming(&self, topic: &str, payload: &[u8]) {
        self.core.handle_incoming(topic, payload);
    }

    /// Start a claiming window: within `duration` a customer who knows
    /// `secret_key` can take ownership of this device.
    pub async fn claim(&self, secret_key: &str, duration: Duration) -> Promise<i32> {
        let body = ClaimRequest::new(secret_key, duration.as_millis() as u64);
        self.core
            .publish(topics::DEVICE_CLAIM, &body, self.core.options().default_qos)
            .await
            .unwrap_or_else(Promise::failed)
    }

    pub async fn send_telemetry(&self, telemetry: impl Into<Telemetry>, qos: QoS) -> Promise<i32> {
        let telemetry = telemetry.into();
        self.core
            .publish(topics::DEVICE_TELEMETRY, &telemetry, qos)
            .await
            .unwrap_or_else(Promise::failed)
    }

    /// Publish client-side attributes.
    pub async fn send_attributes(&self, attributes: &Map<String, Value>, qos: QoS) -> Promise<i32> {
        self.core
            .publish(topics::DEVICE_ATTRIBUTES, attributes, qos)
            .await
            .unwrap_or_else(Promise::failed)
    }

    /// Ask the platform for shared and/or client attribute values.
    ///
    /// `callback` receives the outcome exactly once; the returned promise
    /// carries the same outcome.
    pub async fn request_attributes<F>(
        &self,
        shared_keys: &[&str],
        client_keys: &[&str],
        callback: F,
    ) -> Promise<AttributeResponse>
    where
        F: FnOnce(ClientResult<AttributeResponse>) + Send + 'static,
    {
        let body = AttributeRequest::new(shared_keys, client_keys);
        let raw = self
            .core
            .request(|id| {
                if body.shared_keys.is_none() && body.client_keys.is_none() {
                    return Err(ClientError::InvalidArgument(
                        "no attribute keys requested".into(),
                    ));
                }
                Ok((topics::attribute_request(id.0), serde_json::to_vec(&body)?))
            })
            .await;

        let response = raw.map(|value| {
            serde_json::from_value::<AttributeResponse>(value)
                .map_err(|e| ClientError::Protocol(format!("unexpected attribute response: {e}")))
        });
        response.on_resolve(move |result| callback(result.clone()));
        response
    }

    /// Call `callback` with `{key: value}` whenever the platform changes
    /// shared attribute `key`.
    pub fn subscribe_to_attribute<F>(&self, key: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Map<String, Value>) + Send + Sync + 'static,
    {
        self.core.subscriptions.subscribe(
            DeviceScope::Own,
            KeyFilter::Key(key.to_string()),
            Arc::new(move |update: &AttributeUpdate| callback(&update.data)),
        )
    }

    /// Call `callback` with the full change set of every attribute update.
    pub fn subscribe_to_all_attributes<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Map<String, Value>) + Send + Sync + 'static,
    {
        self.core.subscriptions.subscribe(
            DeviceScope::Own,
            KeyFilter::AnyKey,
            Arc::new(move |update: &AttributeUpdate| callback(&update.data)),
        )
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe_from_attribute(&self, id: SubscriptionId) -> bool {
        self.core.subscriptions.unsubscribe(id)
    }
}
