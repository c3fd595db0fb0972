//! Channel store: membership relation and per-channel append-only message logs.

use std::collections::HashSet;

use rusqlite::{Connection, params};
use tracing::{debug, info};

use murmur_types::models::{Channel, ChannelId, Message, UserId};

use crate::credentials::user_exists;
use crate::models::{from_millis, now_millis};
use crate::{Database, OptionalExt, Result, StoreError};

/// Outcome of a membership check. A missing channel is a negative answer,
/// not a store fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Member,
    NotMember,
    ChannelNotFound,
}

impl Membership {
    pub fn is_member(self) -> bool {
        matches!(self, Self::Member)
    }

    /// Human-readable reason for a negative answer.
    pub fn reason(self) -> Option<&'static str> {
        match self {
            Self::Member => None,
            Self::NotMember => Some("not a member of this channel"),
            Self::ChannelNotFound => Some("channel not found"),
        }
    }
}

impl Database {
    /// Create a channel with the given members. Repeated ids are collapsed,
    /// keeping first-seen order. Every member must be a registered user.
    pub fn create_channel(&self, member_ids: &[UserId]) -> Result<ChannelId> {
        let mut seen = HashSet::new();
        let members: Vec<UserId> = member_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        if members.is_empty() {
            return Err(StoreError::Invalid("channel needs at least one member".into()));
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            for &user_id in &members {
                if !user_exists(&tx, user_id)? {
                    return Err(StoreError::NotFound(format!("user {}", user_id)));
                }
            }

            tx.execute(
                "INSERT INTO channels (last_seq, created_at) VALUES (0, ?1)",
                [now_millis()],
            )?;
            let channel_id = tx.last_insert_rowid();

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO channel_members (channel_id, user_id, position) VALUES (?1, ?2, ?3)",
                )?;
                for (position, user_id) in members.iter().enumerate() {
                    stmt.execute(params![channel_id, user_id, position as i64])?;
                }
            }

            tx.commit()?;
            info!("Created channel {} with {} members", channel_id, members.len());
            Ok(channel_id)
        })
    }

    pub fn is_member(&self, channel_id: ChannelId, user_id: UserId) -> Result<Membership> {
        self.with_conn(|conn| {
            let found: Option<bool> = conn
                .query_row(
                    "SELECT EXISTS(
                        SELECT 1 FROM channel_members WHERE channel_id = ?1 AND user_id = ?2
                     )
                     FROM channels WHERE id = ?1",
                    params![channel_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;

            Ok(match found {
                None => Membership::ChannelNotFound,
                Some(true) => Membership::Member,
                Some(false) => Membership::NotMember,
            })
        })
    }

    /// Append to a channel's log. The message id is the channel's next sequence
    /// number, bumped and used inside one transaction so concurrent appends
    /// can neither collide nor overwrite each other.
    pub fn append_message(
        &self,
        channel_id: ChannelId,
        sender_id: UserId,
        text: &str,
    ) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let seq: i64 = tx
                .query_row(
                    "UPDATE channels SET last_seq = last_seq + 1 WHERE id = ?1 RETURNING last_seq",
                    [channel_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("channel {}", channel_id)))?;

            let now = now_millis();
            tx.execute(
                "INSERT INTO messages (channel_id, seq, sender_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![channel_id, seq, sender_id, text, now],
            )?;
            tx.commit()?;

            debug!("Appended message {} to channel {}", seq, channel_id);
            Ok(Message {
                id: seq,
                channel_id,
                sender_id,
                text: text.to_string(),
                timestamp: from_millis(now),
            })
        })
    }

    /// Channels whose member list contains `user_id`. Callers must not rely on the order.
    pub fn list_channels_for_user(&self, user_id: UserId) -> Result<Vec<Channel>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.created_at
                 FROM channel_members m
                 JOIN channels c ON c.id = m.channel_id
                 WHERE m.user_id = ?1",
            )?;
            let heads = stmt
                .query_map([user_id], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            heads
                .into_iter()
                .map(|(id, created_at)| -> Result<Channel> {
                    Ok(Channel {
                        id,
                        members: query_members(conn, id)?,
                        created_at: from_millis(created_at),
                    })
                })
                .collect()
        })
    }

    /// Full log, oldest first.
    pub fn list_messages(&self, channel_id: ChannelId) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            if !channel_exists(conn, channel_id)? {
                return Err(StoreError::NotFound(format!("channel {}", channel_id)));
            }

            let mut stmt = conn.prepare(
                "SELECT seq, sender_id, body, created_at
                 FROM messages
                 WHERE channel_id = ?1
                 ORDER BY seq ASC",
            )?;
            let rows = stmt
                .query_map([channel_id], |row| {
                    Ok(Message {
                        id: row.get(0)?,
                        channel_id,
                        sender_id: row.get(1)?,
                        text: row.get(2)?,
                        timestamp: from_millis(row.get(3)?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn channel_exists(conn: &Connection, channel_id: ChannelId) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM channels WHERE id = ?1)",
        [channel_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn query_members(conn: &Connection, channel_id: ChannelId) -> Result<Vec<UserId>> {
    let mut stmt = conn.prepare_cached(
        "SELECT user_id FROM channel_members WHERE channel_id = ?1 ORDER BY position",
    )?;
    let members = stmt
        .query_map([channel_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(members)
}
