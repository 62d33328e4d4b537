use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use poker_types::events::GatewayEvent;

/// Serialized frame queued for a connection. Shared between all recipients
/// of one publish.
pub type Frame = Arc<str>;

/// Sending side of one client connection. The transport drains the paired
/// receiver; the dispatcher only ever pushes frames into it.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    user_id: Uuid,
    tx: mpsc::UnboundedSender<Frame>,
}

impl ConnectionHandle {
    pub fn new(user_id: Uuid) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: Uuid::new_v4(),
            user_id,
            tx,
        };
        (handle, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Authenticated user behind this connection.
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Queue an event for this connection only. Returns false if the
    /// connection is gone.
    pub fn send_event(&self, event: &GatewayEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(json) => self.tx.send(json.into()).is_ok(),
            Err(e) => {
                warn!("Failed to serialize {} event: {}", event.name(), e);
                false
            }
        }
    }
}

/// Room member as recorded at join time.
#[derive(Debug, Clone)]
pub struct Member {
    pub conn_id: Uuid,
    pub user_id: Uuid,
    pub name: Option<String>,
    tx: mpsc::UnboundedSender<Frame>,
}

/// Broadcast router: session id -> connections subscribed to that session.
///
/// Rooms are keyed by connection id, so a connection is in a room at most
/// once no matter how often it joins. Publishing has no memory: a connection
/// that joins later must pull the session view to catch up.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// session_id -> (conn_id -> member)
    rooms: RwLock<HashMap<Uuid, HashMap<Uuid, Member>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a session room. Returns false if it was already
    /// subscribed (the recorded name is refreshed).
    pub async fn subscribe(
        &self,
        session_id: Uuid,
        conn: &ConnectionHandle,
        name: Option<String>,
    ) -> bool {
        let member = Member {
            conn_id: conn.id,
            user_id: conn.user_id,
            name,
            tx: conn.tx.clone(),
        };
        self.inner
            .rooms
            .write()
            .await
            .entry(session_id)
            .or_default()
            .insert(conn.id, member)
            .is_none()
    }

    /// Remove a connection from one room. Returns the member if it was there.
    pub async fn unsubscribe(&self, session_id: Uuid, conn_id: Uuid) -> Option<Member> {
        let mut rooms = self.inner.rooms.write().await;
        let room = rooms.get_mut(&session_id)?;
        let member = room.remove(&conn_id);
        if room.is_empty() {
            rooms.remove(&session_id);
        }
        member
    }

    /// Remove a connection from every room it joined (connection loss).
    /// Returns the (session_id, member) pairs that were removed.
    pub async fn unsubscribe_all(&self, conn_id: Uuid) -> Vec<(Uuid, Member)> {
        let mut rooms = self.inner.rooms.write().await;
        let mut removed = Vec::new();
        rooms.retain(|&session_id, room| {
            if let Some(member) = room.remove(&conn_id) {
                removed.push((session_id, member));
            }
            !room.is_empty()
        });
        removed
    }

    /// Deliver an event to every connection currently in the session room.
    /// Fire-and-forget: a dead connection is skipped, the rest still receive.
    pub async fn publish(&self, session_id: Uuid, event: &GatewayEvent) {
        let json: Frame = match serde_json::to_string(event) {
            Ok(j) => j.into(),
            Err(e) => {
                warn!("Failed to serialize {} event: {}", event.name(), e);
                return;
            }
        };

        let rooms = self.inner.rooms.read().await;
        let Some(room) = rooms.get(&session_id) else {
            debug!("No subscribers for {} in session {}", event.name(), session_id);
            return;
        };

        let mut delivered = 0usize;
        for (conn_id, member) in room {
            if member.tx.send(json.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!("Connection {} in session {} is closed, skipping", conn_id, session_id);
            }
        }
        debug!(
            "Published {} to session {} ({}/{} connections)",
            event.name(),
            session_id,
            delivered,
            room.len()
        );
    }

    /// Number of connections subscribed to a session.
    pub async fn room_size(&self, session_id: Uuid) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(&session_id)
            .map_or(0, HashMap::len)
    }

    /// Members of a session room, one entry per connection.
    pub async fn members(&self, session_id: Uuid) -> Vec<Member> {
        self.inner
            .rooms
            .read()
            .await
            .get(&session_id)
            .map(|room| room.values().cloned().collect())
            .unwrap_or_default()
    }
}
