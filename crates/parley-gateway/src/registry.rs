use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use parley_types::events::RoomEvent;

/// Outbound queue of one connection.
pub type MemberSender = mpsc::Sender<RoomEvent>;

/// Live connections of one room: conn_id -> outbound queue.
type Group = RwLock<HashMap<Uuid, MemberSender>>;

/// Tracks which connections are bound to which room and fans events out to them.
///
/// Each room's member set has its own lock. The outer map lock is only taken to
/// look up or create a room's group, never while touching membership.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// Room groups: room name -> members
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn group(&self, room: &str) -> Option<Arc<Group>> {
        self.inner.groups.read().await.get(room).cloned()
    }

    async fn ensure_group(&self, room: &str) -> Arc<Group> {
        if let Some(group) = self.group(room).await {
            return group;
        }
        self.inner
            .groups
            .write()
            .await
            .entry(room.to_string())
            .or_default()
            .clone()
    }

    /// Add a connection to a room's group, creating the group if needed.
    pub async fn join(&self, room: &str, conn_id: Uuid, sender: MemberSender) {
        let group = self.ensure_group(room).await;
        group.write().await.insert(conn_id, sender);
    }

    /// Remove a connection. Returns false if it was not a member.
    pub async fn leave(&self, room: &str, conn_id: Uuid) -> bool {
        match self.group(room).await {
            Some(group) => group.write().await.remove(&conn_id).is_some(),
            None => false,
        }
    }

    /// Deliver `event` to every connection in the room at the time of the call.
    /// Returns how many connections accepted it.
    ///
    /// A member whose queue is full or closed misses the event and is evicted;
    /// dropping its sender ends that connection's outbound loop.
    pub async fn broadcast(&self, room: &str, event: RoomEvent) -> usize {
        let Some(group) = self.group(room).await else {
            return 0;
        };

        let snapshot: Vec<(Uuid, MemberSender)> = group
            .read()
            .await
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (conn_id, tx) in snapshot {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!("Dropping {} from room {}: {}", conn_id, room, e);
                    failed.push(conn_id);
                }
            }
        }

        if !failed.is_empty() {
            let mut members = group.write().await;
            for conn_id in failed {
                members.remove(&conn_id);
            }
        }

        delivered
    }

    /// Connection ids currently bound to a room.
    pub async fn members(&self, room: &str) -> Vec<Uuid> {
        match self.group(room).await {
            Some(group) => group.read().await.keys().copied().collect(),
            None => Vec::new(),
        }
    }
}
