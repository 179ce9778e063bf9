//! The opsdeck server: HTTP and WebSocket routes over an
//! [`opsdeck_core::Hub`].
//!
//! The `opsdeck` binary wires configuration and logging around
//! [`server::serve`]; tests mount [`server::router`] directly.

pub mod server;
