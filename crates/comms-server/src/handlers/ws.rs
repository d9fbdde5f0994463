//! WebSocket endpoint: connection lifecycle and presence registration.
//!
//! The handshake carries an optional `userId` query parameter. A
//! connection without one is accepted and can observe events, but never
//! appears in the online set. Trust in the supplied id is the caller's
//! concern; the relay performs no credential verification.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AppState;
use crate::relay;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// GET /ws?userId=<id>
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Option<String>) {
    let conn_id = Uuid::new_v4();
    info!("[WS] Connected {} (user {:?})", conn_id, user_id);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.connections.insert(conn_id, tx).await;

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    if let Some(user) = user_id.as_deref() {
        if state.presence.add(user, conn_id).await {
            relay::broadcast_presence(&state).await;
        }
    }
    // The fresh socket always gets the current online set, so a new tab
    // renders presence without waiting for the next change.
    relay::send_presence_snapshot(&state, conn_id).await;

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(Message::Text(text)) => {
                relay::dispatch(&state, conn_id, user_id.as_deref(), text.as_str()).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("[WS] Error on {}: {}", conn_id, e);
                break;
            }
        }
    }

    // Teardown order: rooms and connection table first so no relay can
    // target a dead queue, presence last so the offline broadcast sees
    // the final directory.
    state.rooms.remove_connection(conn_id).await;
    state.connections.remove(conn_id).await;
    if let Some(user) = user_id.as_deref() {
        if state.presence.remove(user, conn_id).await {
            relay::broadcast_presence(&state).await;
        }
    }
    writer.abort();
    info!("[WS] Disconnected {}", conn_id);
}
