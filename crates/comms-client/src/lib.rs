//! Realtime adapter for the comms relay.
//!
//! One explicitly constructed [`RealtimeAdapter`] owns the application's
//! relay connection: it connects on demand, defers teardown briefly so
//! navigation churn reuses the live socket, normalizes wire events into
//! [`CommsRealtimePayload`] values on a broadcast stream, and exposes
//! typing/join/send helpers. The hosting application instantiates it
//! once at its composition root; there is no module-level singleton.

pub mod adapter;
pub mod config;
pub mod events;

pub use adapter::{AdapterError, ConnectionState, RealtimeAdapter, RecipientResolver};
pub use config::AdapterConfig;
pub use events::CommsRealtimePayload;
