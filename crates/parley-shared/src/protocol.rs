//! Wire protocol: REST DTOs and the JSON frames exchanged over the
//! persistent WebSocket connection.
//!
//! All field names are camelCase on the wire to match the client contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Chat, ChatKind, Message, MessageStatus};
use crate::types::{ChatId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub mobile: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Either the registered email or the registered mobile number.
    pub email_or_mobile: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub user_id: UserId,
    pub name: String,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Public view of a user; never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub mobile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&crate::models::User> for UserProfile {
    fn from(user: &crate::models::User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            mobile: user.mobile.clone(),
            avatar: user.avatar.clone(),
            created_at: user.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub receiver_id: UserId,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
}

impl From<&Message> for MessageResponse {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content.clone(),
            timestamp: message.timestamp,
            status: message.status,
        }
    }
}

// ---------------------------------------------------------------------------
// Chats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub chat_id: ChatId,
    pub participants: Vec<UserId>,
    pub kind: ChatKind,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<DateTime<Utc>>,
}

impl ChatSummary {
    pub fn from_chat(chat: &Chat) -> Self {
        Self {
            chat_id: chat.id,
            participants: chat.participants.clone(),
            kind: chat.kind,
            created_at: chat.created_at,
            last_message: None,
            last_message_time: None,
        }
    }

    pub fn with_last_message(mut self, message: &Message) -> Self {
        self.last_message = Some(message.content.clone());
        self.last_message_time = Some(message.timestamp);
        self
    }
}

// ---------------------------------------------------------------------------
// WebSocket frames
// ---------------------------------------------------------------------------

/// Frames the client sends over an established WebSocket connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Subscribe this connection to a chat's topic.
    #[serde(rename_all = "camelCase")]
    Subscribe { chat_id: ChatId },
    /// Send a message; the sender is the connection's authenticated principal.
    #[serde(rename_all = "camelCase")]
    SendMessage {
        receiver_id: UserId,
        content: String,
    },
}

/// Frames the server pushes to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    /// A message published on a topic this connection subscribes to.
    Message(MessageResponse),
    /// Acknowledgement of a subscribe frame.
    #[serde(rename_all = "camelCase")]
    Subscribed { chat_id: ChatId },
    /// An operation on this connection failed.
    Error { code: String, message: String },
}
