pub mod attributes;
pub mod claim;
pub mod gateway;
pub mod telemetry;
pub mod topics;

pub use attributes::*;
pub use claim::*;
pub use gateway::{DeviceConnect, DeviceDisconnect};
pub use telemetry::*;
