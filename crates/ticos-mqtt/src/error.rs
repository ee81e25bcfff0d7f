//! Client error types.

use thiserror::Error;

/// Errors surfaced by the device and gateway clients.
///
/// `Clone` so a single resolution can be handed to every waiter of a
/// [`Promise`](crate::Promise).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("no response within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("client is not connected")]
    NotConnected,

    #[error("unknown device '{0}': not connected through this gateway")]
    UnknownDevice(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("client disconnected")]
    Disconnected,

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}

/// Convenience alias for client results.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_mentions_deadline() {
        let err = ClientError::Timeout { timeout_ms: 1500 };
        assert_eq!(err.to_string(), "no response within 1500ms");
    }

    #[test]
    fn unknown_device_names_the_device() {
        let err = ClientError::UnknownDevice("Example Name".into());
        assert!(err.to_string().contains("Example Name"));
    }

    #[test]
    fn json_errors_become_serialization_errors() {
        let err: ClientError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, ClientError::Serialization(_)));
    }
}
