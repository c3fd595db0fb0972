use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ChannelId, Message, MessageId, UserId};

/// Events sent over the WebSocket gateway, server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// The connection is now bound to this user
    Authenticated { user_id: UserId },

    /// Authentication was refused; the connection may retry
    AuthError { reason: String },

    /// The connection now receives messages for this channel
    JoinedChannel { channel_id: ChannelId },

    /// A command was rejected (authorization, validation or store failure)
    Error { reason: String },

    /// A message was appended to a joined channel
    NewMessage {
        id: MessageId,
        channel_id: ChannelId,
        sender_id: UserId,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ServerEvent {
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
        }
    }

    pub fn auth_error(reason: impl Into<String>) -> Self {
        Self::AuthError {
            reason: reason.into(),
        }
    }
}

impl From<Message> for ServerEvent {
    fn from(msg: Message) -> Self {
        Self::NewMessage {
            id: msg.id,
            channel_id: msg.channel_id,
            sender_id: msg.sender_id,
            message: msg.text,
            timestamp: msg.timestamp,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Bind the connection to the owner of `key_value`.
    /// If `user_id` is given it must match the key's owner.
    Authenticate {
        #[serde(default)]
        user_id: Option<UserId>,
        key_value: String,
    },

    /// Subscribe to a channel's new messages
    JoinChannel { channel_id: ChannelId },

    /// Append a message to a channel and fan it out
    SendMessage { channel_id: ChannelId, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_snake_case_tags_and_camel_case_fields() {
        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type":"send_message","data":{"channelId":4,"message":"hi"}}"#,
        )
        .unwrap();
        match cmd {
            ClientCommand::SendMessage { channel_id, message } => {
                assert_eq!(channel_id, 4);
                assert_eq!(message, "hi");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn authenticate_user_id_is_optional() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"authenticate","data":{"keyValue":"abc"}}"#).unwrap();
        assert!(matches!(
            cmd,
            ClientCommand::Authenticate { user_id: None, ref key_value } if key_value == "abc"
        ));
    }

    #[test]
    fn new_message_serializes_wire_names() {
        let event = ServerEvent::from(Message {
            id: 7,
            channel_id: 2,
            sender_id: 1,
            text: "hi".into(),
            timestamp: DateTime::from_timestamp_millis(0).unwrap(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "new_message");
        assert_eq!(json["data"]["channelId"], 2);
        assert_eq!(json["data"]["senderId"], 1);
        assert_eq!(json["data"]["message"], "hi");
    }
}
