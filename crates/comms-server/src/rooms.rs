//! Room registry: named broadcast groups scoping thread events to their
//! participants.
//!
//! Rooms exist implicitly: created on first join, dropped when the last
//! member leaves. The reverse index lets a disconnecting socket leave
//! everything it joined without a scan.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use uuid::Uuid;

/// Room name for a conversation thread.
pub fn thread_room(thread_id: &str) -> String {
    format!("thread:{}", thread_id)
}

#[derive(Default)]
struct RoomIndices {
    members: HashMap<String, HashSet<Uuid>>,
    joined: HashMap<Uuid, HashSet<String>>,
}

/// Connection-to-room membership, both indices behind one lock so they
/// cannot drift apart.
#[derive(Default)]
pub struct RoomRegistry {
    inner: RwLock<RoomIndices>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn join(&self, room: &str, conn_id: Uuid) {
        let mut inner = self.inner.write().await;
        inner.members.entry(room.to_string()).or_default().insert(conn_id);
        inner.joined.entry(conn_id).or_default().insert(room.to_string());
    }

    pub async fn leave(&self, room: &str, conn_id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(members) = inner.members.get_mut(room) {
            members.remove(&conn_id);
            if members.is_empty() {
                inner.members.remove(room);
            }
        }
        if let Some(rooms) = inner.joined.get_mut(&conn_id) {
            rooms.remove(room);
            if rooms.is_empty() {
                inner.joined.remove(&conn_id);
            }
        }
    }

    /// Drop a connection from every room it joined (disconnect path).
    pub async fn remove_connection(&self, conn_id: Uuid) {
        let mut inner = self.inner.write().await;
        let Some(rooms) = inner.joined.remove(&conn_id) else {
            return;
        };
        for room in rooms {
            if let Some(members) = inner.members.get_mut(&room) {
                members.remove(&conn_id);
                if members.is_empty() {
                    inner.members.remove(&room);
                }
            }
        }
    }

    pub async fn members(&self, room: &str) -> Vec<Uuid> {
        self.inner
            .read()
            .await
            .members
            .get(room)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_leave_and_implicit_room_lifecycle() {
        let rooms = RoomRegistry::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let room = thread_room("t1");

        rooms.join(&room, a).await;
        rooms.join(&room, b).await;
        // Idempotent join.
        rooms.join(&room, a).await;
        assert_eq!(rooms.members(&room).await.len(), 2);

        rooms.leave(&room, a).await;
        assert_eq!(rooms.members(&room).await, vec![b]);

        rooms.leave(&room, b).await;
        assert!(rooms.members(&room).await.is_empty());
        assert!(rooms.inner.read().await.members.is_empty());
    }

    #[tokio::test]
    async fn remove_connection_leaves_all_rooms() {
        let rooms = RoomRegistry::new();
        let a = Uuid::new_v4();

        rooms.join(&thread_room("t1"), a).await;
        rooms.join(&thread_room("t2"), a).await;
        rooms.remove_connection(a).await;

        assert!(rooms.members(&thread_room("t1")).await.is_empty());
        assert!(rooms.members(&thread_room("t2")).await.is_empty());
        // Removing an unknown connection is a no-op.
        rooms.remove_connection(a).await;
    }
}
