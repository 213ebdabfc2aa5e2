use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};

use parley_shared::{ChatId, Message, MessageId, MessageStatus, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, chat_id, sender_id, receiver_id, content, timestamp, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.to_string(),
                message.chat_id.to_string(),
                message.sender_id.to_string(),
                message.receiver_id.to_string(),
                message.content,
                message
                    .timestamp
                    .to_rfc3339_opts(SecondsFormat::Micros, true),
                message.status.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn message_by_id(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT id, chat_id, sender_id, receiver_id, content, timestamp, status
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// One page of a chat's messages, oldest first.  `seq` breaks timestamp
    /// ties so page boundaries are stable under coarse clocks.
    pub fn messages_for_chat(&self, chat_id: ChatId, limit: u32, offset: u32) -> Result<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, sender_id, receiver_id, content, timestamp, status
             FROM messages
             WHERE chat_id = ?1
             ORDER BY timestamp ASC, seq ASC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt.query_map(params![chat_id.to_string(), limit, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// The full unpaginated message sequence for a chat, oldest first.
    pub fn all_messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, sender_id, receiver_id, content, timestamp, status
             FROM messages
             WHERE chat_id = ?1
             ORDER BY timestamp ASC, seq ASC",
        )?;

        let rows = stmt.query_map(params![chat_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Most recent message in a chat, if any.
    pub fn last_message_for_chat(&self, chat_id: ChatId) -> Result<Option<Message>> {
        let message = self
            .conn()
            .query_row(
                "SELECT id, chat_id, sender_id, receiver_id, content, timestamp, status
                 FROM messages
                 WHERE chat_id = ?1
                 ORDER BY timestamp DESC, seq DESC
                 LIMIT 1",
                params![chat_id.to_string()],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Overwrite a message's delivery status unconditionally.
    /// [`StoreError::NotFound`] if the id is unknown.
    pub fn update_message_status(&self, id: MessageId, status: MessageStatus) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.to_string()],
        )?;

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let chat_id_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let receiver_str: String = row.get(3)?;
    let ts_str: String = row.get(5)?;
    let status_str: String = row.get(6)?;

    let id = MessageId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let chat_id = ChatId::parse(&chat_id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender_id = UserId::parse(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let receiver_id = UserId::parse(&receiver_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let status = MessageStatus::from_str_tag(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown message status: {status_str}").into(),
        )
    })?;

    Ok(Message {
        id,
        chat_id,
        sender_id,
        receiver_id,
        content: row.get(4)?,
        timestamp,
        status,
    })
}
