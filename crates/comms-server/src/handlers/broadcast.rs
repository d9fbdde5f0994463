//! Server-to-server side-channel and health check.

use axum::extract::ws::Message;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub event: Option<String>,
    pub payload: Option<Value>,
}

/// POST /broadcast
///
/// Lets another backend process push an event into the realtime layer
/// without holding a socket. The payload is relayed verbatim to every
/// connected client under the given event name.
pub async fn broadcast_event(
    State(state): State<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> ApiResult<Json<Value>> {
    let (Some(event), Some(payload)) = (request.event, request.payload) else {
        return Err(ApiError::BadRequest(
            "event and payload are required".to_string(),
        ));
    };

    info!("[Broadcast] {} from side-channel", event);
    let frame = json!({ "event": event, "data": payload }).to_string();
    state
        .connections
        .broadcast_frame(Message::Text(frame.into()), None)
        .await;

    Ok(Json(json!({ "success": true })))
}

/// GET /health
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "comms-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
