//! Ticos agent — library crate behind the `ticos-agent` binary.
//!
//! Exposes the config loader, the startup sequence and the telemetry loops
//! so they can be exercised against a `MockChannel`.

pub mod config;
pub mod runner;
pub mod telemetry;
