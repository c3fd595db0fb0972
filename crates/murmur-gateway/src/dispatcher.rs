use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use murmur_crypto::keys::looks_like_access_key;
use murmur_db::{Database, StoreError};
use murmur_types::events::{ClientCommand, ServerEvent};
use murmur_types::models::{ChannelId, UserId};

use crate::sessions::{ConnectionId, SessionRegistry};

/// Longest message body accepted, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4000;

const INTERNAL_ERROR: &str = "internal error";
const NOT_AUTHENTICATED: &str = "not authenticated";
const INVALID_KEY: &str = "invalid or expired key";

/// Drives the per-connection authenticate / join / send state machine and
/// fans appended messages out to subscribed connections.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    db: Arc<Database>,

    sessions: SessionRegistry,

    /// Per-channel send ordering: held from append through broadcast so every
    /// subscriber sees a channel's messages in log order.
    send_order: Mutex<HashMap<ChannelId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                db,
                sessions: SessionRegistry::new(),
                send_order: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.inner.db
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    /// Register a new, unauthenticated connection. Returns (conn_id, receiver)
    /// for the events addressed to it.
    pub async fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = self.inner.sessions.register(tx).await;
        debug!("Connection {} registered", conn_id);
        (conn_id, rx)
    }

    pub async fn handle(&self, conn_id: ConnectionId, cmd: ClientCommand) {
        match cmd {
            ClientCommand::Authenticate { user_id, key_value } => {
                self.authenticate(conn_id, user_id, &key_value).await
            }
            ClientCommand::JoinChannel { channel_id } => self.join(conn_id, channel_id).await,
            ClientCommand::SendMessage {
                channel_id,
                message,
            } => self.send(conn_id, channel_id, message).await,
        }
    }

    /// Tell a connection its last frame was rejected before dispatch.
    pub async fn reject(&self, conn_id: ConnectionId, reason: &str) {
        self.inner
            .sessions
            .send_to(conn_id, ServerEvent::error(reason))
            .await;
    }

    /// Bind the connection to the key's owner. On failure the connection keeps
    /// whatever state it had and may retry.
    pub async fn authenticate(
        &self,
        conn_id: ConnectionId,
        claimed_user: Option<UserId>,
        key_value: &str,
    ) {
        let sessions = &self.inner.sessions;

        if !looks_like_access_key(key_value) {
            sessions.send_to(conn_id, ServerEvent::auth_error(INVALID_KEY)).await;
            return;
        }

        let key = key_value.to_string();
        let verified = match self.inner.db.call(move |db| db.verify_key(&key)).await {
            Ok(verified) => verified,
            Err(e) => {
                self.store_fault(conn_id, "verify_key", e).await;
                return;
            }
        };

        let Some((user_id, username)) = verified else {
            warn!("Connection {} presented an unknown or expired key", conn_id);
            sessions.send_to(conn_id, ServerEvent::auth_error(INVALID_KEY)).await;
            return;
        };

        if claimed_user.is_some_and(|claimed| claimed != user_id) {
            warn!("Connection {} claimed a user that does not own its key", conn_id);
            sessions.send_to(conn_id, ServerEvent::auth_error(INVALID_KEY)).await;
            return;
        }

        if !sessions.bind_user(conn_id, user_id, username.clone()).await {
            return;
        }

        info!("{} ({}) authenticated on {}", username, user_id, conn_id);
        sessions
            .send_to(conn_id, ServerEvent::Authenticated { user_id })
            .await;
    }

    /// Subscribe the connection to a channel it is a member of.
    pub async fn join(&self, conn_id: ConnectionId, channel_id: ChannelId) {
        let sessions = &self.inner.sessions;

        let Some((user_id, username)) = sessions.user(conn_id).await else {
            sessions.send_to(conn_id, ServerEvent::auth_error(NOT_AUTHENTICATED)).await;
            return;
        };

        let membership = match self
            .inner
            .db
            .call(move |db| db.is_member(channel_id, user_id))
            .await
        {
            Ok(membership) => membership,
            Err(e) => {
                self.store_fault(conn_id, "is_member", e).await;
                return;
            }
        };

        if let Some(reason) = membership.reason() {
            warn!("{} ({}) refused join of channel {}: {}", username, user_id, channel_id, reason);
            sessions.send_to(conn_id, ServerEvent::error(reason)).await;
            return;
        }

        if sessions.subscribe(conn_id, channel_id).await {
            info!("{} ({}) joined channel {}", username, user_id, channel_id);
            sessions
                .send_to(conn_id, ServerEvent::JoinedChannel { channel_id })
                .await;
        }
    }

    /// Append a message and fan it out. Membership is re-checked against the
    /// store on every send; a prior join only affects who receives broadcasts.
    pub async fn send(&self, conn_id: ConnectionId, channel_id: ChannelId, text: String) {
        let sessions = &self.inner.sessions;

        let Some((user_id, username)) = sessions.user(conn_id).await else {
            sessions.send_to(conn_id, ServerEvent::auth_error(NOT_AUTHENTICATED)).await;
            return;
        };

        if let Err(reason) = validate_message(&text) {
            sessions.send_to(conn_id, ServerEvent::error(reason)).await;
            return;
        }

        let membership = match self
            .inner
            .db
            .call(move |db| db.is_member(channel_id, user_id))
            .await
        {
            Ok(membership) => membership,
            Err(e) => {
                self.store_fault(conn_id, "is_member", e).await;
                return;
            }
        };

        if let Some(reason) = membership.reason() {
            warn!("{} ({}) refused send to channel {}: {}", username, user_id, channel_id, reason);
            sessions.send_to(conn_id, ServerEvent::error(reason)).await;
            return;
        }

        let order = self.order_lock(channel_id);
        let guard = order.lock().await;

        match self
            .inner
            .db
            .call(move |db| db.append_message(channel_id, user_id, &text))
            .await
        {
            Ok(message) => {
                // The message is persisted; a failed delivery never undoes that.
                let id = message.id;
                let delivered = sessions.broadcast(channel_id, message.into()).await;
                debug!(
                    "Message {} in channel {} from {} delivered to {} connections",
                    id, channel_id, user_id, delivered
                );
            }
            Err(e) => self.store_fault(conn_id, "append_message", e).await,
        }

        drop(guard);
        self.release_order_lock(channel_id, order);
    }

    /// Forget a connection. Safe to call more than once.
    pub async fn disconnect(&self, conn_id: ConnectionId) {
        if let Some(user_id) = self.inner.sessions.remove(conn_id).await {
            info!("User {} disconnected ({})", user_id, conn_id);
        }
    }

    fn order_lock(&self, channel_id: ChannelId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .inner
            .send_order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(channel_id).or_default().clone()
    }

    /// Drop a channel's ordering lock once no send holds or waits on it.
    fn release_order_lock(&self, channel_id: ChannelId, order: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .inner
            .send_order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map plus ours means nobody else is queued.
        if Arc::strong_count(&order) == 2 {
            locks.remove(&channel_id);
        }
    }

    #[cfg(test)]
    fn order_lock_count(&self) -> usize {
        self.inner
            .send_order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    async fn store_fault(&self, conn_id: ConnectionId, op: &str, e: StoreError) {
        error!("Store {} failed for {}: {}", op, conn_id, e);
        self.inner
            .sessions
            .send_to(conn_id, ServerEvent::error(INTERNAL_ERROR))
            .await;
    }
}

fn validate_message(text: &str) -> Result<(), &'static str> {
    if text.trim().is_empty() {
        return Err("message must not be empty");
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err("message is too long");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use murmur_types::models::Message;

    use super::*;

    struct Harness {
        dispatcher: Dispatcher,
        keys: Vec<String>,
        users: Vec<UserId>,
    }

    /// Three users with valid keys; users[0] and users[1] share channel `1`.
    fn setup() -> Harness {
        let db = Database::open_in_memory().unwrap();
        let mut users = Vec::new();
        let mut keys = Vec::new();
        for name in ["alice", "bob", "carol"] {
            let id = db
                .create_user(name, "password123", &format!("{}@example.com", name))
                .unwrap();
            keys.push(db.issue_key(id, Some(Duration::days(30))).unwrap().key_value);
            users.push(id);
        }
        let channel = db.create_channel(&[users[0], users[1]]).unwrap();
        assert_eq!(channel, 1);

        Harness {
            dispatcher: Dispatcher::new(Arc::new(db)),
            keys,
            users,
        }
    }

    async fn authed(
        h: &Harness,
        idx: usize,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (conn, mut rx) = h.dispatcher.connect().await;
        h.dispatcher.authenticate(conn, None, &h.keys[idx]).await;
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerEvent::Authenticated {
                user_id: h.users[idx]
            }
        );
        (conn, rx)
    }

    fn expect_new_message(event: ServerEvent) -> (i64, UserId, String) {
        match event {
            ServerEvent::NewMessage {
                id,
                sender_id,
                message,
                ..
            } => (id, sender_id, message),
            other => panic!("expected new_message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn bad_key_leaves_connection_usable() {
        let h = setup();
        let (conn, mut rx) = h.dispatcher.connect().await;

        h.dispatcher.authenticate(conn, None, "nope").await;
        assert!(matches!(rx.recv().await.unwrap(), ServerEvent::AuthError { .. }));

        h.dispatcher.join(conn, 1).await;
        assert_eq!(rx.recv().await.unwrap(), ServerEvent::auth_error(NOT_AUTHENTICATED));

        h.dispatcher.authenticate(conn, None, &h.keys[0]).await;
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerEvent::Authenticated { user_id: h.users[0] }
        );
    }

    #[tokio::test]
    async fn claimed_user_must_own_the_key() {
        let h = setup();
        let (conn, mut rx) = h.dispatcher.connect().await;
        h.dispatcher
            .authenticate(conn, Some(h.users[1]), &h.keys[0])
            .await;
        assert!(matches!(rx.recv().await.unwrap(), ServerEvent::AuthError { .. }));
        assert!(h.dispatcher.sessions().user(conn).await.is_none());
    }

    #[tokio::test]
    async fn deactivated_key_is_refused() {
        let h = setup();
        h.dispatcher.db().deactivate_key(&h.keys[0]).unwrap();
        let (conn, mut rx) = h.dispatcher.connect().await;
        h.dispatcher.authenticate(conn, None, &h.keys[0]).await;
        assert_eq!(rx.recv().await.unwrap(), ServerEvent::auth_error(INVALID_KEY));
    }

    #[tokio::test]
    async fn join_reports_store_reason() {
        let h = setup();
        let (conn, mut rx) = authed(&h, 2).await;

        h.dispatcher.join(conn, 1).await;
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerEvent::error("not a member of this channel")
        );

        h.dispatcher.join(conn, 99).await;
        assert_eq!(rx.recv().await.unwrap(), ServerEvent::error("channel not found"));

        assert!(h.dispatcher.sessions().joined_channels(conn).await.is_empty());
    }

    #[tokio::test]
    async fn members_exchange_messages_in_order() {
        let h = setup();
        let (a, mut rx_a) = authed(&h, 0).await;
        let (b, mut rx_b) = authed(&h, 1).await;

        h.dispatcher.join(a, 1).await;
        h.dispatcher.join(b, 1).await;
        assert_eq!(rx_a.recv().await.unwrap(), ServerEvent::JoinedChannel { channel_id: 1 });
        assert_eq!(rx_b.recv().await.unwrap(), ServerEvent::JoinedChannel { channel_id: 1 });

        h.dispatcher.send(a, 1, "hi".into()).await;
        h.dispatcher.send(b, 1, "hello".into()).await;

        for rx in [&mut rx_a, &mut rx_b] {
            let (first, sender, text) = expect_new_message(rx.recv().await.unwrap());
            assert_eq!((sender, text.as_str()), (h.users[0], "hi"));
            let (second, sender, text) = expect_new_message(rx.recv().await.unwrap());
            assert_eq!((sender, text.as_str()), (h.users[1], "hello"));
            assert!(second > first);
        }

        let log = h.dispatcher.db().list_messages(1).unwrap();
        let texts: Vec<_> = log.iter().map(|m: &Message| m.text.as_str()).collect();
        assert_eq!(texts, vec!["hi", "hello"]);
    }

    #[tokio::test]
    async fn outsider_cannot_send_or_mutate_log() {
        let h = setup();
        let (outsider, mut rx) = authed(&h, 2).await;

        h.dispatcher.join(outsider, 1).await;
        rx.recv().await.unwrap();

        h.dispatcher.send(outsider, 1, "let me in".into()).await;
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerEvent::error("not a member of this channel")
        );
        assert!(h.dispatcher.db().list_messages(1).unwrap().is_empty());
    }

    #[tokio::test]
    async fn member_may_send_without_joining_but_is_not_subscribed() {
        let h = setup();
        let (a, mut rx_a) = authed(&h, 0).await;
        let (b, mut rx_b) = authed(&h, 1).await;
        h.dispatcher.join(b, 1).await;
        rx_b.recv().await.unwrap();

        h.dispatcher.send(a, 1, "drive-by".into()).await;

        let (_, sender, _) = expect_new_message(rx_b.recv().await.unwrap());
        assert_eq!(sender, h.users[0]);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_messages_are_rejected_before_the_store() {
        let h = setup();
        let (a, mut rx) = authed(&h, 0).await;

        h.dispatcher.send(a, 1, "   ".into()).await;
        assert_eq!(rx.recv().await.unwrap(), ServerEvent::error("message must not be empty"));

        h.dispatcher
            .send(a, 1, "x".repeat(MAX_MESSAGE_CHARS + 1))
            .await;
        assert_eq!(rx.recv().await.unwrap(), ServerEvent::error("message is too long"));

        assert!(h.dispatcher.db().list_messages(1).unwrap().is_empty());
    }

    #[tokio::test]
    async fn disconnect_stops_delivery_and_is_idempotent() {
        let h = setup();
        let (a, _rx_a) = authed(&h, 0).await;
        let (b, mut rx_b) = authed(&h, 1).await;
        h.dispatcher.join(b, 1).await;
        rx_b.recv().await.unwrap();

        h.dispatcher.disconnect(b).await;
        h.dispatcher.disconnect(b).await;
        assert_eq!(h.dispatcher.sessions().subscriber_count(1).await, 0);

        h.dispatcher.send(a, 1, "anyone?".into()).await;
        // Persisted even though nobody was listening.
        assert_eq!(h.dispatcher.db().list_messages(1).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_senders_are_delivered_in_log_order() {
        let h = setup();
        let (a, _rx_a) = authed(&h, 0).await;
        let (b, _rx_b) = authed(&h, 1).await;
        let (listener, mut rx) = authed(&h, 1).await;
        h.dispatcher.join(listener, 1).await;
        rx.recv().await.unwrap();

        let mut tasks = Vec::new();
        for (conn, tag) in [(a, "a"), (b, "b")] {
            let dispatcher = h.dispatcher.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..20 {
                    dispatcher.send(conn, 1, format!("{}{}", tag, i)).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..40 {
            let (id, _, _) = expect_new_message(rx.recv().await.unwrap());
            seen.push(id);
        }
        assert_eq!(seen, (1..=40).collect::<Vec<_>>());
        assert_eq!(h.dispatcher.order_lock_count(), 0);
    }

    #[tokio::test]
    async fn malformed_and_unknown_keys_are_refused() {
        let h = setup();
        let (conn, mut rx) = h.dispatcher.connect().await;

        let unissued = "0".repeat(32);
        for key in ["", "not-hex", unissued.as_str(), &h.keys[0][..16]] {
            h.dispatcher.authenticate(conn, None, key).await;
            assert_eq!(rx.recv().await.unwrap(), ServerEvent::auth_error(INVALID_KEY));
        }
        assert!(h.dispatcher.sessions().user(conn).await.is_none());
    }
}
