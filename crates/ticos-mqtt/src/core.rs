//! State shared by the device and gateway clients: channel, link,
//! correlation table and subscription registry.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{Event, EventLoop, QoS};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::channel::Channel;
use crate::config::ClientOptions;
use crate::correlation::{RequestId, RequestTable};
use crate::error::{ClientError, ClientResult};
use crate::handler::{self, Inbound};
use crate::link::{self, ConnectionState, Dispatch, LinkSlots};
use crate::promise::Promise;
use crate::subscriptions::SubscriptionRegistry;

/// How long a graceful disconnect waits for the DISCONNECT to go out.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Whole seconds covering `timeout`, at least one.
fn handshake_secs(timeout: Duration) -> u64 {
    timeout.as_millis().div_ceil(1000).max(1) as u64
}

pub(crate) struct ClientCore<C: Channel> {
    channel: C,
    state: watch::Sender<ConnectionState>,
    slots: tokio::sync::Mutex<LinkSlots>,
    /// `true` when the channel is driven from outside (no event loop).
    external: bool,
    requests: Arc<RequestTable>,
    pub(crate) subscriptions: SubscriptionRegistry,
    options: ClientOptions,
}

impl<C: Channel> ClientCore<C> {
    /// A disconnected client that drives `event_loop` once connected.
    pub fn new(channel: C, event_loop: EventLoop, options: ClientOptions) -> Self {
        Self {
            channel,
            state: watch::Sender::new(ConnectionState::Disconnected),
            slots: tokio::sync::Mutex::new(LinkSlots {
                event_loop: Some(event_loop),
                task: None,
            }),
            external: false,
            requests: Arc::new(RequestTable::closed()),
            subscriptions: SubscriptionRegistry::new(),
            options,
        }
    }

    /// A connected client over a channel whose traffic is fed in through
    /// [`handle_incoming`](Self::handle_incoming).
    pub fn attached(channel: C, options: ClientOptions) -> Self {
        Self {
            channel,
            state: watch::Sender::new(ConnectionState::Connected),
            slots: tokio::sync::Mutex::new(LinkSlots::default()),
            external: true,
            requests: Arc::new(RequestTable::new()),
            subscriptions: SubscriptionRegistry::new(),
            options,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    fn ensure_connected(&self) -> ClientResult<()> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            _ => Err(ClientError::NotConnected),
        }
    }

    /// Connect and wait for the broker's CONNACK, at most `timeout`.
    /// Succeeds immediately if already connected.
    pub async fn connect(self: &Arc<Self>, timeout: Duration) -> ClientResult<()> {
        let mut slots = self.slots.lock().await;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        if self.external {
            self.requests.reopen();
            self.state.send_replace(ConnectionState::Connected);
            return Ok(());
        }

        // Reap a task that ended on transport loss.
        if let Some(task) = slots.task.take() {
            task.stop().await?;
        }
        let mut event_loop = match slots.event_loop.take() {
            Some(event_loop) => event_loop,
            None => self.channel.renew().ok_or_else(|| {
                ClientError::Connection("channel cannot open a new connection".into())
            })?,
        };
        // rumqttc bounds the handshake on its own; keep that bound from
        // expiring before the caller's deadline.
        event_loop
            .network_options
            .set_connection_timeout(handshake_secs(timeout));

        self.requests.reopen();
        self.state.send_replace(ConnectionState::Connecting);
        let mut state_rx = self.state.subscribe();
        let dispatch: Arc<dyn Dispatch> = Arc::clone(self) as Arc<dyn Dispatch>;
        let task = link::spawn(event_loop, dispatch);

        let outcome = tokio::time::timeout(
            timeout,
            state_rx.wait_for(|state| *state != ConnectionState::Connecting),
        )
        .await
        .map(|changed| changed.map(|state| *state));

        match outcome {
            Ok(Ok(ConnectionState::Connected)) => {
                slots.task = Some(task);
                tracing::info!("connected to platform");
                Ok(())
            }
            Ok(_) => {
                let error = task.stop().await?;
                self.leave_connected();
                Err(error.unwrap_or_else(|| {
                    ClientError::Connection("connection closed during handshake".into())
                }))
            }
            Err(_) => {
                task.stop().await?;
                self.leave_connected();
                let timeout_ms = timeout.as_millis() as u64;
                tracing::warn!(timeout_ms, "connect timed out");
                Err(ClientError::Timeout { timeout_ms })
            }
        }
    }

    /// Move to DISCONNECTED and fail everything still waiting. Returns the
    /// previous state.
    fn leave_connected(&self) -> ConnectionState {
        let previous = self.state.send_replace(ConnectionState::Disconnected);
        let failed = self.requests.close(ClientError::Disconnected);
        self.channel.abandon_deliveries(&ClientError::Disconnected);
        if failed > 0 {
            tracing::debug!(failed, "pending requests failed on disconnect");
        }
        previous
    }

    /// Graceful disconnect. Pending requests and deliveries fail with
    /// [`ClientError::Disconnected`] and all subscriptions are dropped.
    pub async fn disconnect(&self) -> ClientResult<()> {
        let mut slots = self.slots.lock().await;
        let previous = self.leave_connected();
        let dropped = self.subscriptions.clear();

        let sent = if previous == ConnectionState::Connected {
            self.channel.disconnect().await
        } else {
            Ok(())
        };

        if let Some(task) = slots.task.take() {
            let link::DispatchTask {
                shutdown,
                mut handle,
            } = task;
            let joined = match tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::debug!("disconnect grace period elapsed, stopping dispatch task");
                    let _ = shutdown.send(());
                    handle.await
                }
            };
            if let Err(e) = joined {
                tracing::warn!(error = %e, "dispatch task failed");
            }
        }

        if previous != ConnectionState::Disconnected {
            tracing::info!(subscriptions_dropped = dropped, "disconnected from platform");
        }
        sent
    }

    /// Subscribe to the inbound topics of a client role.
    pub async fn subscribe_topics(&self, filters: &[&str]) -> ClientResult<()> {
        for filter in filters {
            self.channel.subscribe(filter, QoS::AtLeastOnce).await?;
            tracing::debug!(filter, "subscribed");
        }
        Ok(())
    }

    /// Serialize `body` and publish it. The promise resolves on broker
    /// acknowledgement.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        body: &T,
        qos: QoS,
    ) -> ClientResult<Promise<i32>> {
        self.ensure_connected()?;
        let payload = serde_json::to_vec(body)?;
        tracing::debug!(topic, bytes = payload.len(), ?qos, "publishing");
        self.channel.publish(topic, &payload, qos).await
    }

    /// Send a response-expecting request. `build` receives the allocated id
    /// and returns the topic and payload to publish.
    ///
    /// The promise fails with [`ClientError::Timeout`] if no response
    /// arrives within the configured request timeout.
    pub async fn request<F>(&self, build: F) -> Promise<Value>
    where
        F: FnOnce(RequestId) -> ClientResult<(String, Vec<u8>)>,
    {
        if let Err(e) = self.ensure_connected() {
            return Promise::failed(e);
        }
        let (id, promise) = match self.requests.register() {
            Ok(registered) => registered,
            Err(e) => return Promise::failed(e),
        };
        // A caller cancelling the promise frees the entry and its timer.
        let requests = Arc::clone(&self.requests);
        promise.on_resolve(move |result| {
            if matches!(result, Err(ClientError::Cancelled)) {
                requests.discard(id);
            }
        });

        let (topic, payload) = match build(id) {
            Ok(message) => message,
            Err(e) => {
                self.requests.resolve(id, Err(e));
                return promise;
            }
        };

        tracing::debug!(request_id = %id, topic = %topic, "sending request");
        match self.channel.publish(&topic, &payload, QoS::AtLeastOnce).await {
            Ok(delivery) => {
                let requests = Arc::clone(&self.requests);
                delivery.on_resolve(move |delivered| {
                    if let Err(e) = delivered {
                        requests.resolve(id, Err(e.clone()));
                    }
                });
            }
            Err(e) => {
                self.requests.resolve(id, Err(e));
                return promise;
            }
        }

        let timeout = self.options.request_timeout;
        let requests = Arc::clone(&self.requests);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let timeout_ms = timeout.as_millis() as u64;
            if requests.expire(id, timeout_ms) {
                tracing::warn!(request_id = %id, timeout_ms, "request timed out");
            }
        });
        self.requests.arm(id, timer.abort_handle());
        promise
    }

    /// Route one inbound message to the correlation table or the
    /// subscription registry.
    pub fn handle_incoming(&self, topic: &str, payload: &[u8]) {
        match handler::classify(topic, payload) {
            Inbound::AttributeUpdate(update) => {
                let fired = self.subscriptions.dispatch(&update);
                tracing::debug!(
                    device = update.device.as_deref().unwrap_or("<self>"),
                    keys = update.data.len(),
                    fired,
                    "attribute update"
                );
            }
            Inbound::Response { request_id, result } => {
                if !self.requests.resolve(request_id, result) {
                    tracing::debug!(%request_id, "response for unknown or expired request");
                }
            }
            Inbound::Malformed { topic, reason } => {
                tracing::warn!(topic = %topic, reason = %reason, "dropping malformed message");
            }
            Inbound::Unknown { topic } => {
                tracing::debug!(topic = %topic, "ignoring message on unrouted topic");
            }
        }
    }
}

impl<C: Channel> Dispatch for ClientCore<C> {
    fn on_connected(&self) {
        self.state.send_replace(ConnectionState::Connected);
    }

    fn on_publish(&self, topic: &str, payload: &[u8]) {
        self.handle_incoming(topic, payload);
    }

    fn on_event(&self, event: &Event) {
        self.channel.observe(event);
    }

    fn on_connection_lost(&self, error: &ClientError) {
        match self.leave_connected() {
            ConnectionState::Connected => {
                tracing::error!(error = %error, "connection lost");
            }
            _ => tracing::warn!(error = %error, "connection attempt failed"),
        }
    }
}
