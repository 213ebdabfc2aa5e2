//! Message dispatch: persist first, then fan out to live subscribers.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use parley_shared::protocol::{MessageResponse, ServerFrame};
use parley_shared::{ChatId, Message, MessageId, MessageStatus, UserId};
use parley_store::Database;

use crate::broker::Broker;
use crate::chats;
use crate::error::ApiError;

/// Default page size for chat history.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Resolve the pair's chat, persist the message, then publish it to the
/// chat's topic.  Persistence always precedes publication, so every frame a
/// subscriber sees is already durable.
pub async fn send_message(
    db: &Arc<Database>,
    broker: &Arc<Broker>,
    sender: UserId,
    receiver: UserId,
    content: &str,
) -> Result<Message, ApiError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ApiError::BadRequest("message content is empty".into()));
    }

    let chat = chats::resolve_private_chat(db, sender, receiver)?;
    let message = Message {
        id: MessageId::new(),
        chat_id: chat.id,
        sender_id: sender,
        receiver_id: receiver,
        content: content.to_owned(),
        timestamp: Utc::now(),
        status: MessageStatus::Sent,
    };
    db.insert_message(&message)?;
    info!(message_id = %message.id, chat_id = %chat.id, "message persisted");

    let frame = ServerFrame::Message(MessageResponse::from(&message));
    let delivered = broker.publish(chat.id, &frame).await;
    debug!(message_id = %message.id, delivered, "message published");

    Ok(message)
}

/// One page of a chat's history, oldest first.  Only participants may read.
pub fn chat_history(
    db: &Arc<Database>,
    chat_id: ChatId,
    requester: UserId,
    page: u32,
    size: u32,
) -> Result<Vec<Message>, ApiError> {
    if !chats::is_participant(db, chat_id, requester)? {
        return Err(ApiError::Forbidden("not a participant of this chat".into()));
    }
    let size = if size == 0 { DEFAULT_PAGE_SIZE } else { size };
    let offset = page.saturating_mul(size);
    Ok(db.messages_for_chat(chat_id, size, offset)?)
}

/// The full history of a chat, oldest first.  Only participants may read.
pub fn all_chat_messages(
    db: &Arc<Database>,
    chat_id: ChatId,
    requester: UserId,
) -> Result<Vec<Message>, ApiError> {
    if !chats::is_participant(db, chat_id, requester)? {
        return Err(ApiError::Forbidden("not a participant of this chat".into()));
    }
    Ok(db.all_messages_for_chat(chat_id)?)
}

/// Overwrite a message's delivery status and return the updated message.
pub fn update_status(
    db: &Arc<Database>,
    message_id: MessageId,
    status: MessageStatus,
) -> Result<Message, ApiError> {
    db.update_message_status(message_id, status)?;
    let message = db.message_by_id(message_id)?;
    debug!(message_id = %message.id, status = status.as_str(), "message status updated");
    Ok(message)
}
