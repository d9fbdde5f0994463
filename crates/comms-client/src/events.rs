//! Application-level event stream.
//!
//! Wire events normalize into one discriminated union so UI code never
//! touches raw socket payloads.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use comms_common::{ErrorPayload, MessageRecord, ServerEvent, ThreadSummary};

/// Normalized realtime event delivered to subscribers.
#[derive(Debug, Clone)]
pub enum CommsRealtimePayload {
    TypingStart {
        user_id: String,
        user_name: Option<String>,
        thread_id: Option<String>,
    },
    TypingStop {
        user_id: String,
        thread_id: Option<String>,
    },
    MessageCreated {
        message: MessageRecord,
    },
    MessageRead {
        message_id: String,
        thread_id: String,
        user_id: String,
        read_at: DateTime<Utc>,
    },
    PresenceChanged {
        online: HashSet<String>,
    },
    ThreadUpdated {
        thread: ThreadSummary,
    },
    ThreadStatusUpdated {
        thread_id: String,
        status: String,
    },
    ErrorReported {
        code: String,
        message: String,
    },
}

impl CommsRealtimePayload {
    /// Normalize a wire event. `online-users` collapses to a set in
    /// either accepted shape.
    pub fn from_wire(event: ServerEvent) -> Self {
        match event {
            ServerEvent::OnlineUsers(payload) => CommsRealtimePayload::PresenceChanged {
                online: payload.into_set(),
            },
            ServerEvent::Typing {
                user_id,
                user_name,
                thread_id,
                is_typing,
            } => {
                if is_typing {
                    CommsRealtimePayload::TypingStart {
                        user_id,
                        user_name,
                        thread_id,
                    }
                } else {
                    CommsRealtimePayload::TypingStop { user_id, thread_id }
                }
            }
            ServerEvent::MessageCreated { message } => {
                CommsRealtimePayload::MessageCreated { message }
            }
            ServerEvent::MessageRead {
                message_id,
                thread_id,
                user_id,
                read_at,
            } => CommsRealtimePayload::MessageRead {
                message_id,
                thread_id,
                user_id,
                read_at,
            },
            ServerEvent::ThreadUpdated { thread } => {
                CommsRealtimePayload::ThreadUpdated { thread }
            }
            ServerEvent::ThreadStatusUpdated { thread_id, status } => {
                CommsRealtimePayload::ThreadStatusUpdated { thread_id, status }
            }
            ServerEvent::Error(ErrorPayload { code, message }) => {
                CommsRealtimePayload::ErrorReported { code, message }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_online_users_shapes_normalize_to_same_set() {
        let bare = ServerEvent::decode(r#"{"event":"online-users","data":["u1","u2"]}"#).unwrap();
        let wrapped =
            ServerEvent::decode(r#"{"event":"online-users","data":{"userIds":["u2","u1"]}}"#)
                .unwrap();

        let expected: HashSet<String> = ["u1", "u2"].iter().map(|s| s.to_string()).collect();
        for event in [bare, wrapped] {
            match CommsRealtimePayload::from_wire(event) {
                CommsRealtimePayload::PresenceChanged { online } => {
                    assert_eq!(online, expected);
                }
                other => panic!("unexpected payload: {:?}", other),
            }
        }
    }

    #[test]
    fn typing_flag_splits_start_and_stop() {
        let start = ServerEvent::Typing {
            user_id: "u1".to_string(),
            user_name: Some("Alice".to_string()),
            thread_id: Some("t1".to_string()),
            is_typing: true,
        };
        assert!(matches!(
            CommsRealtimePayload::from_wire(start),
            CommsRealtimePayload::TypingStart { .. }
        ));

        let stop = ServerEvent::Typing {
            user_id: "u1".to_string(),
            user_name: None,
            thread_id: Some("t1".to_string()),
            is_typing: false,
        };
        assert!(matches!(
            CommsRealtimePayload::from_wire(stop),
            CommsRealtimePayload::TypingStop { .. }
        ));
    }
}
