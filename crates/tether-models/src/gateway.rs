use serde::{Deserialize, Serialize};

use crate::message::{Attachment, StoredMessage};

/// Inbound gateway events. The `event`/`data` envelope is the wire contract;
/// anything that does not match one of these shapes is rejected at the
/// boundary with a `message:error`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "send:message")]
    SendMessage(SendMessagePayload),
    #[serde(rename = "typing:start")]
    TypingStart(PeerPayload),
    #[serde(rename = "typing:stop")]
    TypingStop(PeerPayload),
    #[serde(rename = "messages:read")]
    MessagesRead(MarkReadPayload),
    #[serde(rename = "get:online_users")]
    GetOnlineUsers(EmptyPayload),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default)]
    pub receiver_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerPayload {
    #[serde(default)]
    pub receiver_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadPayload {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub sender_id: String,
}

/// `get:online_users` carries an empty object on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmptyPayload {}

/// Outbound gateway events. Serialized with the same `event`/`data`
/// envelope as inbound traffic.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "receive:message")]
    ReceiveMessage(StoredMessage),
    #[serde(rename = "message:sent")]
    MessageSent(StoredMessage),
    #[serde(rename = "message:error")]
    MessageError { message: String },
    #[serde(rename = "user:typing")]
    #[serde(rename_all = "camelCase")]
    UserTyping { user_id: String },
    #[serde(rename = "user:stopped_typing")]
    #[serde(rename_all = "camelCase")]
    UserStoppedTyping { user_id: String },
    #[serde(rename = "user:online")]
    #[serde(rename_all = "camelCase")]
    UserOnline { user_id: String },
    #[serde(rename = "user:offline")]
    #[serde(rename_all = "camelCase")]
    UserOffline { user_id: String },
    #[serde(rename = "messages:read")]
    #[serde(rename_all = "camelCase")]
    MessagesRead {
        conversation_id: String,
        read_by: String,
    },
    #[serde(rename = "online:users")]
    OnlineUsers { users: Vec<String> },
}
