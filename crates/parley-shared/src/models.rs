//! Domain model structs persisted by the store and exposed over the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChatId, MessageId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account.  The `password_hash` is opaque to everything except
/// the auth layer and is never serialized into API responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Unique across all users.
    pub email: String,
    /// Unique across all users.
    pub mobile: String,
    /// Argon2 PHC string; opaque outside the auth layer.
    pub password_hash: String,
    /// Optional avatar reference (URL or blob id).
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Kind tag on a chat.  `Group` exists in the data model but no code path
/// creates one; it is reserved for future use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatKind {
    Private,
    Group,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "PRIVATE",
            ChatKind::Group => "GROUP",
        }
    }

    pub fn from_str_tag(s: &str) -> Option<Self> {
        match s {
            "PRIVATE" => Some(ChatKind::Private),
            "GROUP" => Some(ChatKind::Group),
            _ => None,
        }
    }
}

/// The durable record identifying a unique relationship between a set of
/// participants.  For `ChatKind::Private` the participant set has exactly two
/// members and there is at most one such chat per unordered pair.
/// Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub participants: Vec<UserId>,
    pub kind: ChatKind,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Delivery status of a message.  The progression SENT → DELIVERED → READ is
/// conventional but not enforced: status updates overwrite unconditionally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "SENT",
            MessageStatus::Delivered => "DELIVERED",
            MessageStatus::Read => "READ",
        }
    }

    pub fn from_str_tag(s: &str) -> Option<Self> {
        match s {
            "SENT" => Some(MessageStatus::Sent),
            "DELIVERED" => Some(MessageStatus::Delivered),
            "READ" => Some(MessageStatus::Read),
            _ => None,
        }
    }
}

/// A single chat message.  `receiver_id` is redundant with the chat's
/// participant set for private chats but is stored explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
}
