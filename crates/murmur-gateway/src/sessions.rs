use std::collections::{HashMap, HashSet};

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use murmur_types::events::ServerEvent;
use murmur_types::models::{ChannelId, UserId};

pub type ConnectionId = Uuid;

/// Live state of one connection. Dropped on disconnect, never persisted.
struct Session {
    /// Set once `authenticate` succeeds: (user_id, username)
    user: Option<(UserId, String)>,
    joined: HashSet<ChannelId>,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<ConnectionId, Session>,
    /// Broadcast groups: channel_id -> subscribed connections
    groups: HashMap<ChannelId, HashSet<ConnectionId>>,
}

/// Connection -> user bindings and channel broadcast groups.
///
/// Both maps sit behind one lock so a connection is never in a group
/// without also being in the session table.
#[derive(Default)]
pub struct SessionRegistry {
    tables: RwLock<Tables>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unauthenticated connection. Events for it are delivered to `tx`.
    pub async fn register(&self, tx: mpsc::UnboundedSender<ServerEvent>) -> ConnectionId {
        let conn_id = Uuid::new_v4();
        self.tables.write().await.sessions.insert(
            conn_id,
            Session {
                user: None,
                joined: HashSet::new(),
                tx,
            },
        );
        conn_id
    }

    /// Bind a connection to a user. Rebinding to a different user drops every
    /// subscription made under the previous identity. Returns false if the
    /// connection is gone.
    pub async fn bind_user(&self, conn_id: ConnectionId, user_id: UserId, username: String) -> bool {
        let mut tables = self.tables.write().await;
        let Tables { sessions, groups } = &mut *tables;

        let Some(session) = sessions.get_mut(&conn_id) else {
            return false;
        };

        if session.user.as_ref().is_some_and(|(current, _)| *current != user_id) {
            for channel_id in session.joined.drain() {
                leave_group(groups, channel_id, conn_id);
            }
        }
        session.user = Some((user_id, username));
        true
    }

    pub async fn user(&self, conn_id: ConnectionId) -> Option<(UserId, String)> {
        self.tables
            .read()
            .await
            .sessions
            .get(&conn_id)
            .and_then(|s| s.user.clone())
    }

    /// Put an authenticated connection into a channel's broadcast group.
    /// Authorization is the caller's job; this only routes.
    pub async fn subscribe(&self, conn_id: ConnectionId, channel_id: ChannelId) -> bool {
        let mut tables = self.tables.write().await;
        let Tables { sessions, groups } = &mut *tables;

        match sessions.get_mut(&conn_id) {
            Some(session) if session.user.is_some() => {
                session.joined.insert(channel_id);
                groups.entry(channel_id).or_default().insert(conn_id);
                true
            }
            _ => false,
        }
    }

    pub async fn joined_channels(&self, conn_id: ConnectionId) -> HashSet<ChannelId> {
        self.tables
            .read()
            .await
            .sessions
            .get(&conn_id)
            .map(|s| s.joined.clone())
            .unwrap_or_default()
    }

    /// Remove a connection and all its subscriptions. Returns the bound user, if any.
    /// Calling it again is a no-op.
    pub async fn remove(&self, conn_id: ConnectionId) -> Option<UserId> {
        let mut tables = self.tables.write().await;
        let Tables { sessions, groups } = &mut *tables;

        let session = sessions.remove(&conn_id)?;
        for channel_id in &session.joined {
            leave_group(groups, *channel_id, conn_id);
        }
        session.user.map(|(user_id, _)| user_id)
    }

    /// Send a targeted event to one connection.
    pub async fn send_to(&self, conn_id: ConnectionId, event: ServerEvent) {
        if let Some(session) = self.tables.read().await.sessions.get(&conn_id) {
            let _ = session.tx.send(event);
        }
    }

    /// Deliver an event to every connection subscribed to `channel_id`.
    /// Closed receivers are skipped. Returns how many connections accepted it.
    pub async fn broadcast(&self, channel_id: ChannelId, event: ServerEvent) -> usize {
        let tables = self.tables.read().await;
        let Some(members) = tables.groups.get(&channel_id) else {
            return 0;
        };

        members
            .iter()
            .filter_map(|conn_id| tables.sessions.get(conn_id))
            .filter(|session| session.tx.send(event.clone()).is_ok())
            .count()
    }

    pub async fn subscriber_count(&self, channel_id: ChannelId) -> usize {
        self.tables
            .read()
            .await
            .groups
            .get(&channel_id)
            .map_or(0, HashSet::len)
    }

    pub async fn connection_count(&self) -> usize {
        self.tables.read().await.sessions.len()
    }
}

fn leave_group(
    groups: &mut HashMap<ChannelId, HashSet<ConnectionId>>,
    channel_id: ChannelId,
    conn_id: ConnectionId,
) {
    if let Some(members) = groups.get_mut(&channel_id) {
        members.remove(&conn_id);
        if members.is_empty() {
            groups.remove(&channel_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_requires_authentication() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = registry.register(tx).await;

        assert!(!registry.subscribe(conn, 1).await);
        assert!(registry.bind_user(conn, 10, "alice".into()).await);
        assert!(registry.subscribe(conn, 1).await);
        assert_eq!(registry.subscriber_count(1).await, 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_clears_groups() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = registry.register(tx).await;
        registry.bind_user(conn, 10, "alice".into()).await;
        registry.subscribe(conn, 1).await;
        registry.subscribe(conn, 2).await;

        assert_eq!(registry.remove(conn).await, Some(10));
        assert_eq!(registry.remove(conn).await, None);
        assert_eq!(registry.subscriber_count(1).await, 0);
        assert_eq!(registry.subscriber_count(2).await, 0);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn rebinding_to_another_user_drops_subscriptions() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = registry.register(tx).await;
        registry.bind_user(conn, 10, "alice".into()).await;
        registry.subscribe(conn, 1).await;

        // Same user again keeps them.
        registry.bind_user(conn, 10, "alice".into()).await;
        assert_eq!(registry.joined_channels(conn).await.len(), 1);

        registry.bind_user(conn, 11, "bob".into()).await;
        assert!(registry.joined_channels(conn).await.is_empty());
        assert_eq!(registry.subscriber_count(1).await, 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_only_the_group() {
        let registry = SessionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = registry.register(tx_a).await;
        let b = registry.register(tx_b).await;
        registry.bind_user(a, 1, "a".into()).await;
        registry.bind_user(b, 2, "b".into()).await;
        registry.subscribe(a, 5).await;

        let delivered = registry
            .broadcast(5, ServerEvent::JoinedChannel { channel_id: 5 })
            .await;
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_skips_closed_receivers() {
        let registry = SessionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = registry.register(tx).await;
        registry.bind_user(conn, 1, "a".into()).await;
        registry.subscribe(conn, 5).await;
        drop(rx);

        let delivered = registry
            .broadcast(5, ServerEvent::JoinedChannel { channel_id: 5 })
            .await;
        assert_eq!(delivered, 0);
    }
}
