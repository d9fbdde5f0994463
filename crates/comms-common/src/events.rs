//! Event envelopes and payload types.
//!
//! Inbound (`ClientEvent`) and outbound (`ServerEvent`) events are
//! adjacently tagged: the `event` field carries the wire name, the `data`
//! field the payload. Decoding failures surface as [`ProtocolError`] so
//! the server can answer with a structured `error` event instead of
//! dropping the connection.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error raised while decoding or validating a wire event.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed event envelope: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("typing event needs a threadId or a recipientId")]
    TypingUnrouted,
}

/// A file attached to a message. The relay only carries the reference;
/// blob upload happens over the regular HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Typing signal, either thread-scoped or targeted at one recipient.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub is_typing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

impl TypingPayload {
    /// A typing event must be routable to a room or a user.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.thread_id.is_none() && self.recipient_id.is_none() {
            return Err(ProtocolError::TypingUnrouted);
        }
        Ok(())
    }
}

/// Events a client sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join-thread")]
    JoinThread { #[serde(rename = "threadId")] thread_id: String },

    #[serde(rename = "leave-thread")]
    LeaveThread { #[serde(rename = "threadId")] thread_id: String },

    #[serde(rename = "typing")]
    Typing(TypingPayload),

    #[serde(rename = "send-message", rename_all = "camelCase")]
    SendMessage {
        thread_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to_id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },

    // Both spellings exist in the wild.
    #[serde(rename = "message-seen", alias = "message_seen", rename_all = "camelCase")]
    MessageSeen {
        message_id: String,
        thread_id: String,
    },
}

impl ClientEvent {
    /// Decode a text frame, rejecting envelopes with empty required fields.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let event: ClientEvent = serde_json::from_str(raw)?;
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            ClientEvent::JoinThread { thread_id } | ClientEvent::LeaveThread { thread_id } => {
                if thread_id.is_empty() {
                    return Err(ProtocolError::MissingField("threadId"));
                }
            }
            ClientEvent::Typing(payload) => payload.validate()?,
            ClientEvent::SendMessage { thread_id, content, .. } => {
                if thread_id.is_empty() {
                    return Err(ProtocolError::MissingField("threadId"));
                }
                if content.is_empty() {
                    return Err(ProtocolError::MissingField("content"));
                }
            }
            ClientEvent::MessageSeen { message_id, thread_id } => {
                if message_id.is_empty() {
                    return Err(ProtocolError::MissingField("messageId"));
                }
                if thread_id.is_empty() {
                    return Err(ProtocolError::MissingField("threadId"));
                }
            }
        }
        Ok(())
    }
}

/// A persisted message as relayed to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub thread_id: String,
    pub author_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

/// Thread metadata refreshed after each persisted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub thread_id: String,
    pub last_message_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_by: Option<String>,
    pub message_count: i64,
}

/// The `online-users` payload arrives in two shapes depending on the
/// relay generation: a bare array of user ids, or an object wrapping
/// them under `userIds`. Both normalize to the same set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OnlineUsersPayload {
    Ids(Vec<String>),
    Wrapped {
        #[serde(rename = "userIds")]
        user_ids: Vec<String>,
    },
}

impl OnlineUsersPayload {
    pub fn into_set(self) -> HashSet<String> {
        match self {
            OnlineUsersPayload::Ids(ids) => ids.into_iter().collect(),
            OnlineUsersPayload::Wrapped { user_ids } => user_ids.into_iter().collect(),
        }
    }
}

/// Structured failure surfaced to one client; the connection stays open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Events the relay sends to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "online-users")]
    OnlineUsers(OnlineUsersPayload),

    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing {
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
        is_typing: bool,
    },

    // Older clients listen for `receive-message`; same payload.
    #[serde(rename = "message_created", alias = "receive-message")]
    MessageCreated { message: MessageRecord },

    #[serde(rename = "message_read", rename_all = "camelCase")]
    MessageRead {
        message_id: String,
        thread_id: String,
        user_id: String,
        read_at: DateTime<Utc>,
    },

    #[serde(rename = "thread_updated")]
    ThreadUpdated { thread: ThreadSummary },

    #[serde(rename = "thread_status_updated", rename_all = "camelCase")]
    ThreadStatusUpdated { thread_id: String, status: String },

    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerEvent {
    /// Presence snapshot in the wrapped (object) shape.
    pub fn online_users(user_ids: Vec<String>) -> Self {
        ServerEvent::OnlineUsers(OnlineUsersPayload::Wrapped { user_ids })
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            code: code.into(),
            message: message.into(),
        })
    }

    /// Serialize to a text frame. Payloads are plain data, so this only
    /// fails on a serde_json internal error.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_send_message() {
        let raw = r#"{"event":"send-message","data":{"threadId":"t1","content":"hi"}}"#;
        let event = ClientEvent::decode(raw).unwrap();
        match event {
            ClientEvent::SendMessage { thread_id, content, reply_to_id, attachments, .. } => {
                assert_eq!(thread_id, "t1");
                assert_eq!(content, "hi");
                assert!(reply_to_id.is_none());
                assert!(attachments.is_empty());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn message_seen_accepts_both_spellings() {
        let kebab = r#"{"event":"message-seen","data":{"messageId":"m1","threadId":"t1"}}"#;
        let snake = r#"{"event":"message_seen","data":{"messageId":"m1","threadId":"t1"}}"#;
        assert!(matches!(
            ClientEvent::decode(kebab).unwrap(),
            ClientEvent::MessageSeen { .. }
        ));
        assert!(matches!(
            ClientEvent::decode(snake).unwrap(),
            ClientEvent::MessageSeen { .. }
        ));
    }

    #[test]
    fn send_message_requires_content() {
        let raw = r#"{"event":"send-message","data":{"threadId":"t1","content":""}}"#;
        assert!(matches!(
            ClientEvent::decode(raw),
            Err(ProtocolError::MissingField("content"))
        ));
    }

    #[test]
    fn typing_needs_a_route() {
        let raw = r#"{"event":"typing","data":{"isTyping":true}}"#;
        assert!(matches!(
            ClientEvent::decode(raw),
            Err(ProtocolError::TypingUnrouted)
        ));

        let routed = r#"{"event":"typing","data":{"isTyping":true,"recipientId":"u2"}}"#;
        assert!(ClientEvent::decode(routed).is_ok());
    }

    #[test]
    fn online_users_both_shapes_normalize() {
        let bare: OnlineUsersPayload = serde_json::from_str(r#"["u1","u2"]"#).unwrap();
        let wrapped: OnlineUsersPayload =
            serde_json::from_str(r#"{"userIds":["u2","u1"]}"#).unwrap();
        assert_eq!(bare.into_set(), wrapped.into_set());
    }

    #[test]
    fn message_created_accepts_legacy_name() {
        let raw = r#"{"event":"receive-message","data":{"message":{"id":"m1","threadId":"t1","authorId":"u1","content":"hi","createdAt":"2026-01-01T00:00:00Z"}}}"#;
        let event = ServerEvent::decode(raw).unwrap();
        match event {
            ServerEvent::MessageCreated { message } => {
                assert_eq!(message.id, "m1");
                assert_eq!(message.thread_id, "t1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn server_event_round_trips_envelope() {
        let event = ServerEvent::online_users(vec!["u1".into()]);
        let raw = event.encode().unwrap();
        assert!(raw.contains(r#""event":"online-users""#));
        assert!(raw.contains(r#""userIds""#));
        let back = ServerEvent::decode(&raw).unwrap();
        assert!(matches!(back, ServerEvent::OnlineUsers(_)));
    }
}
