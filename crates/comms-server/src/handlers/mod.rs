//! HTTP and WebSocket handlers.

mod broadcast;
mod ws;

pub use broadcast::{broadcast_event, health_check};
pub use ws::ws_handler;
