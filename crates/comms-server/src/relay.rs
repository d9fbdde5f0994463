//! Event relay: connection table and per-event dispatch.
//!
//! Each socket gets an unbounded outbound queue; relaying an event means
//! encoding it once and handing the frame to the queues of the selected
//! connections. Fan-out selection follows the configured
//! [`RelayTopology`](crate::config::RelayTopology): room-scoped delivery
//! to `thread:<id>` members, or global broadcast with client-side
//! filtering. The sender is never echoed its own thread event.

use std::collections::HashMap;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use comms_common::{ClientEvent, ServerEvent};

use crate::config::{AppState, RelayTopology};
use crate::rooms::thread_room;
use crate::store::NewMessage;

/// Outbound half of one connection.
pub type Outbound = mpsc::UnboundedSender<Message>;

/// Live connections by id. A send to a connection whose receiver is gone
/// is ignored; the socket task is already tearing it down.
#[derive(Default)]
pub struct ConnectionTable {
    senders: RwLock<HashMap<Uuid, Outbound>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, conn_id: Uuid, sender: Outbound) {
        self.senders.write().await.insert(conn_id, sender);
    }

    pub async fn remove(&self, conn_id: Uuid) {
        self.senders.write().await.remove(&conn_id);
    }

    pub async fn send_frame(&self, conn_id: Uuid, frame: Message) {
        if let Some(sender) = self.senders.read().await.get(&conn_id) {
            let _ = sender.send(frame);
        }
    }

    pub async fn send_frame_to_many(&self, conn_ids: &[Uuid], frame: Message) {
        let senders = self.senders.read().await;
        for conn_id in conn_ids {
            if let Some(sender) = senders.get(conn_id) {
                let _ = sender.send(frame.clone());
            }
        }
    }

    pub async fn broadcast_frame(&self, frame: Message, except: Option<Uuid>) {
        let senders = self.senders.read().await;
        for (conn_id, sender) in senders.iter() {
            if Some(*conn_id) == except {
                continue;
            }
            let _ = sender.send(frame.clone());
        }
    }
}

fn encode(event: &ServerEvent) -> Option<Message> {
    match event.encode() {
        Ok(raw) => Some(Message::Text(raw.into())),
        Err(e) => {
            warn!("[Relay] Failed to encode event: {}", e);
            None
        }
    }
}

/// Send one event to one connection.
pub async fn send_to(state: &AppState, conn_id: Uuid, event: &ServerEvent) {
    if let Some(frame) = encode(event) {
        state.connections.send_frame(conn_id, frame).await;
    }
}

/// Send one event to every connection, optionally skipping one.
pub async fn broadcast(state: &AppState, event: &ServerEvent, except: Option<Uuid>) {
    if let Some(frame) = encode(event) {
        state.connections.broadcast_frame(frame, except).await;
    }
}

/// Send one event to every connection of one user.
pub async fn send_to_user(state: &AppState, user_id: &str, event: &ServerEvent) {
    let conns = state.presence.connections_of(user_id).await;
    if conns.is_empty() {
        return;
    }
    if let Some(frame) = encode(event) {
        state.connections.send_frame_to_many(&conns, frame).await;
    }
}

/// Relay a thread-scoped event according to the configured topology.
pub async fn relay_to_thread(
    state: &AppState,
    thread_id: &str,
    event: &ServerEvent,
    except: Option<Uuid>,
) {
    match state.config.topology {
        RelayTopology::RoomScoped => {
            let members: Vec<Uuid> = state
                .rooms
                .members(&thread_room(thread_id))
                .await
                .into_iter()
                .filter(|conn_id| Some(*conn_id) != except)
                .collect();
            if members.is_empty() {
                return;
            }
            if let Some(frame) = encode(event) {
                state.connections.send_frame_to_many(&members, frame).await;
            }
        }
        RelayTopology::GlobalBroadcast => broadcast(state, event, except).await,
    }
}

/// Push the full online set to everyone (presence change) or to one
/// freshly connected socket.
pub async fn broadcast_presence(state: &AppState) {
    let event = ServerEvent::online_users(state.presence.snapshot().await);
    broadcast(state, &event, None).await;
}

pub async fn send_presence_snapshot(state: &AppState, conn_id: Uuid) {
    let event = ServerEvent::online_users(state.presence.snapshot().await);
    send_to(state, conn_id, &event).await;
}

/// Handle one inbound text frame. Malformed payloads and persistence
/// failures answer the origin with an `error` event; the connection and
/// the presence directory are never affected.
pub async fn dispatch(state: &AppState, conn_id: Uuid, user_id: Option<&str>, raw: &str) {
    let event = match ClientEvent::decode(raw) {
        Ok(event) => event,
        Err(e) => {
            debug!("[Relay] Rejected frame from {}: {}", conn_id, e);
            send_to(state, conn_id, &ServerEvent::error("bad_payload", e.to_string())).await;
            return;
        }
    };

    match event {
        ClientEvent::JoinThread { thread_id } => {
            state.rooms.join(&thread_room(&thread_id), conn_id).await;
        }
        ClientEvent::LeaveThread { thread_id } => {
            state.rooms.leave(&thread_room(&thread_id), conn_id).await;
        }
        ClientEvent::Typing(payload) => {
            let Some(user_id) = user_id else {
                send_unidentified(state, conn_id).await;
                return;
            };
            let outbound = ServerEvent::Typing {
                user_id: user_id.to_string(),
                user_name: payload.user_name.clone(),
                thread_id: payload.thread_id.clone(),
                is_typing: payload.is_typing,
            };
            if let Some(recipient) = payload.recipient_id.as_deref() {
                send_to_user(state, recipient, &outbound).await;
            } else if let Some(thread_id) = payload.thread_id.as_deref() {
                relay_to_thread(state, thread_id, &outbound, Some(conn_id)).await;
            }
        }
        ClientEvent::SendMessage {
            thread_id,
            content,
            reply_to_id,
            attachments,
            user_name,
        } => {
            let Some(user_id) = user_id else {
                send_unidentified(state, conn_id).await;
                return;
            };
            let input = NewMessage {
                thread_id: thread_id.clone(),
                author_id: user_id.to_string(),
                author_name: user_name,
                content,
                reply_to_id,
                attachments,
            };
            match state.sink.create_message(input).await {
                Ok((message, thread)) => {
                    relay_to_thread(
                        state,
                        &thread_id,
                        &ServerEvent::MessageCreated { message },
                        Some(conn_id),
                    )
                    .await;
                    relay_to_thread(
                        state,
                        &thread_id,
                        &ServerEvent::ThreadUpdated { thread },
                        None,
                    )
                    .await;
                }
                Err(e) => {
                    warn!("[Relay] Persist failed for {} in {}: {}", user_id, thread_id, e);
                    send_to(
                        state,
                        conn_id,
                        &ServerEvent::error("persist_failed", "message could not be stored"),
                    )
                    .await;
                }
            }
        }
        ClientEvent::MessageSeen {
            message_id,
            thread_id,
        } => {
            let Some(user_id) = user_id else {
                send_unidentified(state, conn_id).await;
                return;
            };
            match state.sink.mark_seen(&message_id, &thread_id, user_id).await {
                Ok(read_at) => {
                    let outbound = ServerEvent::MessageRead {
                        message_id,
                        thread_id: thread_id.clone(),
                        user_id: user_id.to_string(),
                        read_at,
                    };
                    relay_to_thread(state, &thread_id, &outbound, Some(conn_id)).await;
                }
                Err(e) => {
                    warn!("[Relay] Receipt failed for {}: {}", user_id, e);
                    send_to(
                        state,
                        conn_id,
                        &ServerEvent::error("persist_failed", "read receipt could not be stored"),
                    )
                    .await;
                }
            }
        }
    }
}

async fn send_unidentified(state: &AppState, conn_id: Uuid) {
    send_to(
        state,
        conn_id,
        &ServerEvent::error("not_identified", "connection has no userId"),
    )
    .await;
}
