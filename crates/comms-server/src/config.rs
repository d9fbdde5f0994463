//! Relay server configuration and shared state.

use std::path::PathBuf;
use std::sync::Arc;

use crate::presence::PresenceDirectory;
use crate::relay::ConnectionTable;
use crate::rooms::RoomRegistry;
use crate::store::MessageSink;

/// How relayed events fan out.
///
/// Room-scoped bounds delivery to connections that joined the event's
/// `thread:<id>` room. Global broadcast reaches every other connection
/// and leaves filtering to the client; acceptable only for small
/// deployments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayTopology {
    RoomScoped,
    GlobalBroadcast,
}

impl RelayTopology {
    fn from_env() -> Self {
        match std::env::var("COMMS_TOPOLOGY").as_deref() {
            Ok("global") => RelayTopology::GlobalBroadcast,
            _ => RelayTopology::RoomScoped,
        }
    }
}

/// Configuration for the relay server.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Listening port.
    pub port: u16,
    /// Directory holding the SQLite message store.
    pub data_dir: PathBuf,
    /// Fan-out strategy for thread-scoped events.
    pub topology: RelayTopology,
    /// Allow any origin (non-production deployments).
    pub permissive_cors: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: std::env::var("COMMS_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4100),
            data_dir: std::env::var("COMMS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("comms_data")),
            topology: RelayTopology::from_env(),
            permissive_cors: true,
        }
    }
}

impl RelayConfig {
    /// Create config with a custom data directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.data_dir = data_dir.into();
        config
    }

    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }
}

/// App state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: RelayConfig,
    pub connections: Arc<ConnectionTable>,
    pub presence: Arc<PresenceDirectory>,
    pub rooms: Arc<RoomRegistry>,
    pub sink: Arc<dyn MessageSink>,
}

impl AppState {
    pub fn new(config: RelayConfig, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            config,
            connections: Arc::new(ConnectionTable::new()),
            presence: Arc::new(PresenceDirectory::in_memory()),
            rooms: Arc::new(RoomRegistry::new()),
            sink,
        }
    }
}
