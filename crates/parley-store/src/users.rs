use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};

use parley_shared::{User, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Insert a new user.  A duplicate email or mobile maps to
    /// [`StoreError::Conflict`].
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO users (id, name, email, mobile, password_hash, avatar, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user.id.to_string(),
                    user.name,
                    user.email,
                    user.mobile,
                    user.password_hash,
                    user.avatar,
                    user.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                ],
            )
            .map_err(|e| StoreError::from_sqlite(e, "email or mobile already registered"))?;
        Ok(())
    }

    pub fn user_by_id(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, name, email, mobile, password_hash, avatar, created_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, name, email, mobile, password_hash, avatar, created_at
                 FROM users WHERE email = ?1",
                params![email],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn user_by_mobile(&self, mobile: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, name, email, mobile, password_hash, avatar, created_at
                 FROM users WHERE mobile = ?1",
                params![mobile],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Find a user by either registered identifier (login form accepts both).
    pub fn user_by_email_or_mobile(&self, identifier: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, name, email, mobile, password_hash, avatar, created_at
                 FROM users WHERE email = ?1 OR mobile = ?1",
                params![identifier],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// All users except the given one, for the counterpart-discovery listing.
    pub fn users_except(&self, excluded: UserId) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, email, mobile, password_hash, avatar, created_at
             FROM users WHERE id != ?1 ORDER BY created_at",
        )?;

        let rows = stmt.query_map(params![excluded.to_string()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let ts_str: String = row.get(6)?;

    let id = UserId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(User {
        id,
        name: row.get(1)?,
        email: row.get(2)?,
        mobile: row.get(3)?,
        password_hash: row.get(4)?,
        avatar: row.get(5)?,
        created_at,
    })
}
