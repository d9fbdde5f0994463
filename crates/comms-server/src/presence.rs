//! Presence directory: which users currently hold at least one live
//! connection.
//!
//! A user may have several simultaneous connections (multiple tabs), so
//! the directory maps user id to a set of connection ids. The storage
//! backend sits behind [`PresenceStore`]; the in-memory backend is the
//! single-instance default and an external shared store is the
//! multi-instance extension point.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Storage backend for presence state. All operations are idempotent:
/// re-adding an existing connection or removing an absent one is a no-op.
pub trait PresenceStore: Send + Sync {
    /// Register a connection. Returns true when the user had no
    /// connections before (went online).
    fn add(&mut self, user_id: &str, conn_id: Uuid) -> bool;

    /// Deregister a connection. Returns true when this was the user's
    /// last connection (went offline).
    fn remove(&mut self, user_id: &str, conn_id: Uuid) -> bool;

    fn is_online(&self, user_id: &str) -> bool;

    /// All currently online user ids.
    fn snapshot(&self) -> Vec<String>;

    /// Connection ids for one user; empty when offline.
    fn connections_of(&self, user_id: &str) -> Vec<Uuid>;
}

/// In-memory backend: `user id -> set of connection ids`. Entries are
/// deleted when their set empties, so "present in the map" and "online"
/// stay the same thing.
#[derive(Default)]
pub struct InMemoryPresence {
    users: HashMap<String, HashSet<Uuid>>,
}

impl PresenceStore for InMemoryPresence {
    fn add(&mut self, user_id: &str, conn_id: Uuid) -> bool {
        let conns = self.users.entry(user_id.to_string()).or_default();
        let was_empty = conns.is_empty();
        conns.insert(conn_id);
        was_empty
    }

    fn remove(&mut self, user_id: &str, conn_id: Uuid) -> bool {
        let Some(conns) = self.users.get_mut(user_id) else {
            return false;
        };
        conns.remove(&conn_id);
        if conns.is_empty() {
            self.users.remove(user_id);
            true
        } else {
            false
        }
    }

    fn is_online(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    fn snapshot(&self) -> Vec<String> {
        self.users.keys().cloned().collect()
    }

    fn connections_of(&self, user_id: &str) -> Vec<Uuid> {
        self.users
            .get(user_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Serialized front over the storage backend. The tokio runtime runs
/// handlers on multiple threads, so connect/disconnect mutations go
/// through one RwLock.
pub struct PresenceDirectory {
    store: RwLock<Box<dyn PresenceStore>>,
}

impl PresenceDirectory {
    pub fn in_memory() -> Self {
        Self::with_store(Box::new(InMemoryPresence::default()))
    }

    pub fn with_store(store: Box<dyn PresenceStore>) -> Self {
        Self {
            store: RwLock::new(store),
        }
    }

    /// Returns true when the user transitioned offline -> online.
    pub async fn add(&self, user_id: &str, conn_id: Uuid) -> bool {
        let became_online = self.store.write().await.add(user_id, conn_id);
        if became_online {
            debug!("[Presence] {} online", user_id);
        }
        became_online
    }

    /// Returns true when the user transitioned online -> offline.
    pub async fn remove(&self, user_id: &str, conn_id: Uuid) -> bool {
        let went_offline = self.store.write().await.remove(user_id, conn_id);
        if went_offline {
            debug!("[Presence] {} offline", user_id);
        }
        went_offline
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.store.read().await.is_online(user_id)
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.store.read().await.snapshot()
    }

    pub async fn connections_of(&self, user_id: &str) -> Vec<Uuid> {
        self.store.read().await.connections_of(user_id)
    }
}
