//! Mock MQTT channel for testing without a real broker.
//!
//! Records all published messages and subscription filters for
//! assertion in tests. Deliveries are acknowledged immediately unless held.

use std::sync::Mutex;

use async_trait::async_trait;
use rumqttc::QoS;
use serde_json::Value;

use crate::channel::Channel;
use crate::error::{ClientError, ClientResult};
use crate::lock;
use crate::promise::{self, Promise, Resolver};

/// A recorded publish call.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

impl PublishedMessage {
    /// Payload parsed as JSON. Panics on invalid JSON; test use only.
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or_else(|e| {
            panic!("payload on '{}' is not JSON: {e}", self.topic);
        })
    }
}

#[derive(Default)]
struct MockState {
    published: Vec<PublishedMessage>,
    subscriptions: Vec<(String, QoS)>,
    disconnects: usize,
    offline: bool,
    hold: bool,
    held: Vec<Resolver<i32>>,
}

/// Mock implementation of the `Channel` trait.
///
/// Stores all publishes and subscriptions in memory for test verification.
/// Thread-safe via `Mutex` (fine for test contexts).
#[derive(Default)]
pub struct MockChannel {
    state: Mutex<MockState>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all published messages.
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state).published.clone()
    }

    /// Get all subscription filters.
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        lock(&self.state).subscriptions.clone()
    }

    /// Get the last published message.
    pub fn last_published(&self) -> Option<PublishedMessage> {
        lock(&self.state).published.last().cloned()
    }

    /// Get published messages for a specific topic.
    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        lock(&self.state)
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Check whether a subscription was made to the given filter.
    pub fn is_subscribed_to(&self, filter: &str) -> bool {
        lock(&self.state)
            .subscriptions
            .iter()
            .any(|(f, _)| f == filter)
    }

    pub fn disconnect_count(&self) -> usize {
        lock(&self.state).disconnects
    }

    /// Make subsequent publishes and subscribes fail.
    pub fn set_offline(&self, offline: bool) {
        lock(&self.state).offline = offline;
    }

    /// Keep delivery promises unresolved until [`release_deliveries`](Self::release_deliveries).
    pub fn hold_deliveries(&self, hold: bool) {
        lock(&self.state).hold = hold;
    }

    /// Acknowledge every held delivery. Returns how many were released.
    pub fn release_deliveries(&self) -> usize {
        let held = std::mem::take(&mut lock(&self.state).held);
        let count = held.len();
        for resolver in held {
            resolver.resolve(Ok(0));
        }
        count
    }

    /// Clear all recorded state.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.published.clear();
        state.subscriptions.clear();
        state.disconnects = 0;
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> ClientResult<Promise<i32>> {
        let mut state = lock(&self.state);
        if state.offline {
            return Err(ClientError::Publish("mock channel is offline".into()));
        }
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
        });

        if state.hold {
            let (resolver, promise) = promise::pair();
            state.held.push(resolver);
            return Ok(promise);
        }
        Ok(Promise::ready(Ok(0)))
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> ClientResult<()> {
        let mut state = lock(&self.state);
        if state.offline {
            return Err(ClientError::Subscribe("mock channel is offline".into()));
        }
        state.subscriptions.push((filter.to_string(), qos));
        Ok(())
    }

    async fn disconnect(&self) -> ClientResult<()> {
        lock(&self.state).disconnects += 1;
        Ok(())
    }

    fn abandon_deliveries(&self, error: &ClientError) {
        let held = std::mem::take(&mut lock(&self.state).held);
        for resolver in held {
            resolver.resolve(Err(error.clone()));
        }
    }
}
