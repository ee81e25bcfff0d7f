//! End-to-end tests for the Ticos client SDK.
//!
//! The tests live in `tests/`; they share a `helpers` module that plays the
//! platform's side of every exchange on top of `MockChannel`.
