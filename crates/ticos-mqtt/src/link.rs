//! Connection link: the state machine and the dispatch task that drives
//! the rumqttc event loop.
//!
//! One task per connection polls the `EventLoop` and hands every event to a
//! [`Dispatch`] implementation. The task never retries: it ends on the first
//! transport error, on an outgoing DISCONNECT, or when told to stop. The
//! event loop dies with the task, since it still holds the old socket; a
//! later connect starts from a fresh one.

use std::sync::Arc;

use rumqttc::{ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{ClientError, ClientResult};

/// Connection state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Receiver of event-loop activity. Called only from the dispatch task.
pub(crate) trait Dispatch: Send + Sync + 'static {
    /// The broker accepted the connection.
    fn on_connected(&self);
    /// An application message arrived.
    fn on_publish(&self, topic: &str, payload: &[u8]);
    /// Every event, before any of the more specific hooks.
    fn on_event(&self, event: &Event);
    /// The transport failed or the broker refused the connection.
    fn on_connection_lost(&self, error: &ClientError);
}

/// Why the dispatch task ended: `None` when stopped or after a DISCONNECT.
pub(crate) type LinkExit = Option<ClientError>;

/// A running dispatch task.
pub(crate) struct DispatchTask {
    pub shutdown: oneshot::Sender<()>,
    pub handle: JoinHandle<LinkExit>,
}

impl DispatchTask {
    /// Signal the task to stop and wait for it.
    pub async fn stop(self) -> ClientResult<LinkExit> {
        let _ = self.shutdown.send(());
        self.handle
            .await
            .map_err(|e| ClientError::Connection(format!("dispatch task failed: {e}")))
    }
}

/// Resources owned by the link between connects.
#[derive(Default)]
pub(crate) struct LinkSlots {
    /// The event loop built with the channel, until the first connect
    /// takes it.
    pub event_loop: Option<EventLoop>,
    pub task: Option<DispatchTask>,
}

/// Start driving `event_loop` on a new task.
pub(crate) fn spawn(event_loop: EventLoop, dispatch: Arc<dyn Dispatch>) -> DispatchTask {
    let (shutdown, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(drive(event_loop, dispatch, shutdown_rx));
    DispatchTask { shutdown, handle }
}

async fn drive(
    mut event_loop: EventLoop,
    dispatch: Arc<dyn Dispatch>,
    mut shutdown: oneshot::Receiver<()>,
) -> LinkExit {
    loop {
        let polled = tokio::select! {
            _ = &mut shutdown => None,
            result = event_loop.poll() => Some(result),
        };
        let Some(result) = polled else {
            tracing::debug!("dispatch task stopped");
            return None;
        };

        match result {
            Ok(event) => {
                dispatch.on_event(&event);
                match &event {
                    Event::Incoming(Packet::ConnAck(ack)) => {
                        if ack.code == ConnectReturnCode::Success {
                            dispatch.on_connected();
                        } else {
                            let error = ClientError::Connection(format!(
                                "connection refused: {:?}",
                                ack.code
                            ));
                            dispatch.on_connection_lost(&error);
                            return Some(error);
                        }
                    }
                    Event::Incoming(Packet::Publish(publish)) => {
                        dispatch.on_publish(&publish.topic, &publish.payload);
                    }
                    Event::Outgoing(Outgoing::Disconnect) => {
                        tracing::debug!("disconnect sent, dispatch task exiting");
                        return None;
                    }
                    _ => {}
                }
            }
            Err(e) => {
                let error = match e {
                    ConnectionError::NetworkTimeout => ClientError::Timeout {
                        timeout_ms: event_loop.network_options.connection_timeout() * 1000,
                    },
                    other => ClientError::Connection(other.to_string()),
                };
                dispatch.on_connection_lost(&error);
                return Some(error);
            }
        }
    }
}
