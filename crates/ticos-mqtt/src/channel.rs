//! MQTT channel: the transport seam between the clients and the broker.
//!
//! Wraps `rumqttc::AsyncClient` and turns each publish into a
//! [`Promise`] that settles when the broker acknowledges delivery.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::lock;
use crate::promise::{self, Promise, Resolver};
use crate::tls;

// ── Channel trait ─────────────────────────────────────────────

/// Abstraction for MQTT publishing and subscribing.
///
/// Enables mocking in tests without a real MQTT broker.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Queue a raw payload. The returned promise resolves with `0` once the
    /// broker has the message (immediately after sending for QoS 0).
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> ClientResult<Promise<i32>>;

    /// Subscribe to a topic filter.
    async fn subscribe(&self, filter: &str, qos: QoS) -> ClientResult<()>;

    /// Queue an MQTT DISCONNECT.
    async fn disconnect(&self) -> ClientResult<()>;

    /// Feed an event-loop event to the channel. Used for delivery tracking.
    fn observe(&self, _event: &Event) {}

    /// Fail every delivery still waiting for an acknowledgement.
    fn abandon_deliveries(&self, _error: &ClientError) {}

    /// Replace the underlying client with a fresh one and return the event
    /// loop that drives it. `None` for channels driven from outside.
    fn renew(&self) -> Option<EventLoop> {
        None
    }
}

#[async_trait]
impl<C: Channel> Channel for Arc<C> {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> ClientResult<Promise<i32>> {
        (**self).publish(topic, payload, qos).await
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> ClientResult<()> {
        (**self).subscribe(filter, qos).await
    }

    async fn disconnect(&self) -> ClientResult<()> {
        (**self).disconnect().await
    }

    fn observe(&self, event: &Event) {
        (**self).observe(event)
    }

    fn abandon_deliveries(&self, error: &ClientError) {
        (**self).abandon_deliveries(error)
    }

    fn renew(&self) -> Option<EventLoop> {
        (**self).renew()
    }
}

// ── Delivery tracking ─────────────────────────────────────────

/// Matches publish acknowledgements to the promises handed out by
/// [`MqttChannel::publish`].
///
/// rumqttc assigns packet ids inside the event loop, so publishes are queued
/// in submission order and paired with `Outgoing::Publish(pkid)` events as
/// they appear.
#[derive(Default)]
struct DeliveryTracker {
    queued: VecDeque<(QoS, Resolver<i32>)>,
    inflight: HashMap<u16, Resolver<i32>>,
}

impl DeliveryTracker {
    fn enqueue(&mut self, qos: QoS, resolver: Resolver<i32>) {
        self.queued.push_back((qos, resolver));
    }

    /// The next queued publish went out as `pkid`. QoS 0 deliveries are
    /// complete at this point and are returned for resolution.
    fn sent(&mut self, pkid: u16) -> Option<Resolver<i32>> {
        let (qos, resolver) = self.queued.pop_front()?;
        match qos {
            QoS::AtMostOnce => Some(resolver),
            QoS::AtLeastOnce | QoS::ExactlyOnce => {
                self.inflight.insert(pkid, resolver);
                None
            }
        }
    }

    fn acknowledged(&mut self, pkid: u16) -> Option<Resolver<i32>> {
        self.inflight.remove(&pkid)
    }

    fn drain(&mut self) -> Vec<Resolver<i32>> {
        self.queued
            .drain(..)
            .map(|(_, resolver)| resolver)
            .chain(self.inflight.drain().map(|(_, resolver)| resolver))
            .collect()
    }

    fn len(&self) -> usize {
        self.queued.len() + self.inflight.len()
    }
}

// ── MqttChannel ───────────────────────────────────────────────

/// MQTT channel connected to the platform broker.
///
/// Owns the `AsyncClient` for publishing/subscribing. The `EventLoop` is
/// returned separately from `new()`; the client's dispatch task drives it
/// and feeds every event back through [`Channel::observe`]. An event loop
/// serves a single connection: reconnecting goes through
/// [`Channel::renew`].
pub struct MqttChannel {
    options: MqttOptions,
    client: Mutex<AsyncClient>,
    deliveries: Mutex<DeliveryTracker>,
    /// Keeps tracker order equal to request order.
    publish_order: tokio::sync::Mutex<()>,
}

/// Capacity of the request queue between `AsyncClient` and `EventLoop`.
const REQUEST_CAPACITY: usize = 64;

impl MqttChannel {
    /// Create a channel from config. TLS material is loaded here, so a bad
    /// certificate path fails before any network activity.
    pub fn new(config: &ClientConfig) -> ClientResult<(Self, EventLoop)> {
        let mut options = MqttOptions::new(config.client_id(), &config.host, config.port());
        options.set_keep_alive(Duration::from_secs(config.keepalive_secs.into()));
        options.set_credentials(config.access_token.as_str(), "");

        if config.use_tls {
            let transport = tls::load_tls_transport(config)?;
            options.set_transport(transport);
        }

        let (client, mut event_loop) = AsyncClient::new(options.clone(), REQUEST_CAPACITY);
        event_loop
            .network_options
            .set_connection_timeout(config.connect_timeout_secs.max(1));

        Ok((
            Self {
                options,
                client: Mutex::new(client),
                deliveries: Mutex::new(DeliveryTracker::default()),
                publish_order: tokio::sync::Mutex::new(()),
            },
            event_loop,
        ))
    }

    /// Deliveries not yet acknowledged.
    pub fn pending_deliveries(&self) -> usize {
        lock(&self.deliveries).len()
    }

    fn client(&self) -> AsyncClient {
        lock(&self.client).clone()
    }
}

#[async_trait]
impl Channel for MqttChannel {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> ClientResult<Promise<i32>> {
        let _order = self.publish_order.lock().await;
        let (resolver, promise) = promise::pair();
        lock(&self.deliveries).enqueue(qos, resolver);

        if let Err(e) = self.client().publish(topic, qos, false, payload.to_vec()).await {
            // Nothing reached the event loop; take back the entry just queued.
            let _ = lock(&self.deliveries).queued.pop_back();
            return Err(ClientError::Publish(e.to_string()));
        }
        Ok(promise)
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> ClientResult<()> {
        self.client()
            .subscribe(filter, qos)
            .await
            .map_err(|e| ClientError::Subscribe(e.to_string()))
    }

    async fn disconnect(&self) -> ClientResult<()> {
        self.client()
            .disconnect()
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))
    }

    fn observe(&self, event: &Event) {
        let completed = {
            let mut deliveries = lock(&self.deliveries);
            match event {
                Event::Outgoing(Outgoing::Publish(pkid)) => deliveries.sent(*pkid),
                Event::Incoming(Packet::PubAck(ack)) => deliveries.acknowledged(ack.pkid),
                Event::Incoming(Packet::PubComp(comp)) => deliveries.acknowledged(comp.pkid),
                _ => None,
            }
        };
        if let Some(resolver) = completed {
            resolver.resolve(Ok(0));
        }
    }

    fn abandon_deliveries(&self, error: &ClientError) {
        let abandoned = lock(&self.deliveries).drain();
        if !abandoned.is_empty() {
            tracing::debug!(count = abandoned.len(), error = %error, "abandoning unacknowledged deliveries");
        }
        for resolver in abandoned {
            resolver.resolve(Err(error.clone()));
        }
    }

    fn renew(&self) -> Option<EventLoop> {
        let (client, event_loop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        *lock(&self.client) = client;
        // Anything still tracked belongs to the previous connection.
        self.abandon_deliveries(&ClientError::Disconnected);
        Some(event_loop)
    }
}
