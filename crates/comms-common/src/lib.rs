//! Shared wire-protocol types for the comms relay.
//!
//! Both the relay server and the client adapter speak the same envelope
//! format over WebSocket text frames:
//!
//! ```text
//! { "event": "send-message", "data": { "threadId": "t1", "content": "hi" } }
//! ```
//!
//! Event names and payload fields keep the camelCase/kebab-case spelling
//! of the original wire protocol so existing clients interoperate.

pub mod events;

pub use events::{
    Attachment, ClientEvent, ErrorPayload, MessageRecord, OnlineUsersPayload, ProtocolError,
    ServerEvent, ThreadSummary, TypingPayload,
};
