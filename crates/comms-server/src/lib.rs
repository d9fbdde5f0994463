//! Comms Relay Server Library
//!
//! Presence tracking and event relay for the realtime messaging layer:
//! WebSocket connections announce a user, join per-thread rooms, and
//! exchange typing/message/read events; messages are made durable by the
//! persistence bridge before they fan out.

pub mod config;
pub mod error;
pub mod handlers;
pub mod presence;
pub mod relay;
pub mod rooms;
pub mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{AppState, RelayConfig};
use handlers::{broadcast_event, health_check, ws_handler};
use store::SqliteMessageStore;

/// Build the relay router over a prepared state. Split out so tests can
/// bind it to an ephemeral port.
pub fn build_router(state: AppState) -> Router {
    let permissive_cors = state.config.permissive_cors;
    let router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/broadcast", post(broadcast_event))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if permissive_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

pub async fn run() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();

    let config = RelayConfig::default();
    config.ensure_dirs().await?;

    info!("=== Comms Relay ===");
    info!("Topology: {:?}", config.topology);
    info!("Data directory: {:?}", config.data_dir);

    let store = Arc::new(SqliteMessageStore::new(&config.data_dir).await?);
    let state = AppState::new(config.clone(), store);
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
