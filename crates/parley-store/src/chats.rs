use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use parley_shared::{Chat, ChatId, ChatKind, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Normalized identity of a private chat: the two participant ids sorted
/// lexicographically and joined with `:`.  Order-independent, so `{A,B}` and
/// `{B,A}` produce the same key, and the UNIQUE column backing it enforces
/// at most one private chat per unordered pair.
pub fn private_pair_key(a: UserId, b: UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

impl Database {
    /// Insert a chat and its participant rows atomically.
    ///
    /// For private chats the pair key's UNIQUE constraint may reject the
    /// insert when a concurrent creator won the race; that surfaces as
    /// [`StoreError::Conflict`] and callers fetch the existing row instead.
    pub fn insert_chat(&self, chat: &Chat, pair_key: Option<&str>) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO chats (id, kind, pair_key, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                chat.id.to_string(),
                chat.kind.as_str(),
                pair_key,
                chat.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )
        .map_err(|e| StoreError::from_sqlite(e, "chat already exists for this pair"))?;

        for participant in &chat.participants {
            // OR IGNORE collapses a self-chat's duplicate participant row.
            tx.execute(
                "INSERT OR IGNORE INTO chat_participants (chat_id, user_id) VALUES (?1, ?2)",
                params![chat.id.to_string(), participant.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn chat_by_id(&self, id: ChatId) -> Result<Chat> {
        let conn = self.conn();
        let chat = conn
            .query_row(
                "SELECT id, kind, created_at FROM chats WHERE id = ?1",
                params![id.to_string()],
                row_to_chat_head,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        load_participants(&conn, chat)
    }

    /// Look up a private chat by its normalized pair key.
    pub fn chat_by_pair_key(&self, pair_key: &str) -> Result<Option<Chat>> {
        let conn = self.conn();
        let head = conn
            .query_row(
                "SELECT id, kind, created_at FROM chats WHERE pair_key = ?1",
                params![pair_key],
                row_to_chat_head,
            )
            .optional()?;

        match head {
            Some(chat) => Ok(Some(load_participants(&conn, chat)?)),
            None => Ok(None),
        }
    }

    /// All chats the given user participates in, newest first.
    pub fn chats_for_user(&self, user: UserId) -> Result<Vec<Chat>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.kind, c.created_at
             FROM chats c
             JOIN chat_participants p ON p.chat_id = c.id
             WHERE p.user_id = ?1
             ORDER BY c.created_at DESC",
        )?;

        let rows = stmt.query_map(params![user.to_string()], row_to_chat_head)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(load_participants(&conn, row?)?);
        }
        Ok(chats)
    }

    /// Participant set of a chat; [`StoreError::NotFound`] if the chat
    /// does not exist.
    pub fn chat_participants(&self, chat_id: ChatId) -> Result<Vec<UserId>> {
        let conn = self.conn();

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM chats WHERE id = ?1)",
            params![chat_id.to_string()],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::NotFound);
        }

        participants_of(&conn, chat_id)
    }
}

fn load_participants(conn: &Connection, mut chat: Chat) -> Result<Chat> {
    chat.participants = participants_of(conn, chat.id)?;
    Ok(chat)
}

fn participants_of(conn: &Connection, chat_id: ChatId) -> Result<Vec<UserId>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM chat_participants WHERE chat_id = ?1 ORDER BY user_id")?;

    let rows = stmt.query_map(params![chat_id.to_string()], |row| {
        let id_str: String = row.get(0)?;
        UserId::parse(&id_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
    })?;

    let mut participants = Vec::new();
    for row in rows {
        participants.push(row?);
    }
    Ok(participants)
}

/// Map a `(id, kind, created_at)` row; participants are loaded separately.
fn row_to_chat_head(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let id_str: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let ts_str: String = row.get(2)?;

    let id = ChatId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let kind = ChatKind::from_str_tag(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown chat kind: {kind_str}").into(),
        )
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Chat {
        id,
        participants: Vec::new(),
        kind,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn private_chat(a: UserId, b: UserId) -> Chat {
        Chat {
            id: ChatId::new(),
            participants: vec![a, b],
            kind: ChatKind::Private,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn pair_key_is_order_independent() {
        let a = UserId::new();
        let b = UserId::new();
        assert_eq!(private_pair_key(a, b), private_pair_key(b, a));
        assert_ne!(private_pair_key(a, b), private_pair_key(a, a));
    }

    #[test]
    fn insert_and_fetch_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let chat = private_chat(a, b);
        db.insert_chat(&chat, Some(&private_pair_key(a, b))).unwrap();

        let fetched = db.chat_by_id(chat.id).unwrap();
        assert_eq!(fetched.id, chat.id);
        assert_eq!(fetched.kind, ChatKind::Private);
        assert_eq!(fetched.participants.len(), 2);
        assert!(fetched.participants.contains(&a));
        assert!(fetched.participants.contains(&b));
    }

    #[test]
    fn duplicate_pair_key_is_conflict() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let key = private_pair_key(a, b);

        db.insert_chat(&private_chat(a, b), Some(&key)).unwrap();
        let err = db
            .insert_chat(&private_chat(b, a), Some(&key))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn lookup_by_pair_key() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let key = private_pair_key(a, b);
        let chat = private_chat(a, b);
        db.insert_chat(&chat, Some(&key)).unwrap();

        let found = db.chat_by_pair_key(&key).unwrap().unwrap();
        assert_eq!(found.id, chat.id);
        assert!(db.chat_by_pair_key("x:y").unwrap().is_none());
    }

    #[test]
    fn self_chat_collapses_participants() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        let chat = private_chat(a, a);
        db.insert_chat(&chat, Some(&private_pair_key(a, a))).unwrap();

        let fetched = db.chat_by_id(chat.id).unwrap();
        assert_eq!(fetched.participants, vec![a]);
    }

    #[test]
    fn chats_for_user_lists_memberships() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());

        let ab = private_chat(a, b);
        let ac = private_chat(a, c);
        db.insert_chat(&ab, Some(&private_pair_key(a, b))).unwrap();
        db.insert_chat(&ac, Some(&private_pair_key(a, c))).unwrap();

        assert_eq!(db.chats_for_user(a).unwrap().len(), 2);
        assert_eq!(db.chats_for_user(b).unwrap().len(), 1);
        assert!(db.chats_for_user(UserId::new()).unwrap().is_empty());
    }

    #[test]
    fn participants_of_missing_chat_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db.chat_participants(ChatId::new()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
