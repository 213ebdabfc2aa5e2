//! Conversation resolution: the one-chat-per-pair rule.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use parley_shared::protocol::ChatSummary;
use parley_shared::{Chat, ChatId, ChatKind, UserId};
use parley_store::{private_pair_key, Database, StoreError};

use crate::error::ApiError;

/// Return the private chat between the two users, creating it if it does
/// not exist.  Idempotent under concurrency: the pair key is unique in the
/// store, so a racing insert loses with a conflict and re-fetches the row
/// the winner created.
pub fn resolve_private_chat(
    db: &Arc<Database>,
    a: UserId,
    b: UserId,
) -> Result<Chat, ApiError> {
    let pair_key = private_pair_key(a, b);
    if let Some(chat) = db.chat_by_pair_key(&pair_key)? {
        debug!(chat_id = %chat.id, "resolved existing private chat");
        return Ok(chat);
    }
    create_private_chat(db, a, b, &pair_key)
}

/// Insert a new private chat for the pair, falling back to the existing row
/// when a concurrent creator got there between our lookup and our insert.
fn create_private_chat(
    db: &Arc<Database>,
    a: UserId,
    b: UserId,
    pair_key: &str,
) -> Result<Chat, ApiError> {
    let chat = Chat {
        id: ChatId::new(),
        participants: vec![a, b],
        kind: ChatKind::Private,
        created_at: Utc::now(),
    };
    match db.insert_chat(&chat, Some(pair_key)) {
        Ok(()) => {
            info!(chat_id = %chat.id, "created private chat");
            Ok(chat)
        }
        Err(StoreError::Conflict(_)) => {
            // Lost the race; the other writer's chat is the canonical one.
            let existing = db
                .chat_by_pair_key(pair_key)?
                .ok_or(StoreError::NotFound)?;
            debug!(chat_id = %existing.id, "raced on chat creation, using existing");
            Ok(existing)
        }
        Err(e) => Err(e.into()),
    }
}

/// Whether `user` is a participant of `chat_id`.  Missing chats surface as
/// `NotFound` from the store.
pub fn is_participant(db: &Arc<Database>, chat_id: ChatId, user: UserId) -> Result<bool, ApiError> {
    let participants = db.chat_participants(chat_id)?;
    Ok(participants.contains(&user))
}

/// All chats the user belongs to, newest first, each annotated with its
/// latest message for conversation-list previews.
pub fn chats_with_previews(
    db: &Arc<Database>,
    user: UserId,
) -> Result<Vec<ChatSummary>, ApiError> {
    let chats = db.chats_for_user(user)?;
    let mut summaries = Vec::with_capacity(chats.len());
    for chat in &chats {
        let summary = match db.last_message_for_chat(chat.id)? {
            Some(last) => ChatSummary::from_chat(chat).with_last_message(&last),
            None => ChatSummary::from_chat(chat),
        };
        summaries.push(summary);
    }
    Ok(summaries)
}
