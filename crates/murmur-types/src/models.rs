use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type ChannelId = i64;
pub type MessageId = i64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Opaque bearer key. Any active, unexpired key is a valid credential for its user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessKey {
    pub id: i64,
    pub user_id: UserId,
    pub key_value: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A channel and its member list, in creation order.
/// The message log is fetched separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub members: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

/// One entry of a channel's append-only log. `id` is the per-channel sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub sender_id: UserId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}
