//! MQTT client SDK for the Ticos IoT platform.
//!
//! Provides device and gateway clients over a typed MQTT abstraction:
//! - `Channel` trait for publish/subscribe (mockable in tests)
//! - `MqttChannel` with optional TLS (mTLS) for production
//! - `MockChannel` for testing without a broker
//! - `DeviceClient` and `GatewayClient` façades
//! - `Promise` result handles settled by the dispatch task

pub mod channel;
pub mod config;
mod core;
pub mod correlation;
pub mod device;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod link;
pub mod mock;
pub mod promise;
pub mod subscriptions;
pub mod tls;

use std::sync::{Mutex, MutexGuard};

// Re-exports for convenience.
pub use channel::{Channel, MqttChannel};
pub use config::{ClientConfig, ClientOptions, qos_from_level};
pub use correlation::RequestId;
pub use device::DeviceClient;
pub use error::{ClientError, ClientResult};
pub use gateway::{DeviceSession, GatewayClient};
pub use handler::{Inbound, classify};
pub use link::ConnectionState;
pub use mock::MockChannel;
pub use promise::Promise;
pub use rumqttc::QoS;
pub use subscriptions::SubscriptionId;

/// Lock a std mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
