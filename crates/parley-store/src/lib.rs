//! # parley-store
//!
//! SQLite persistence for the Parley messaging backend.
//!
//! The crate exposes a [`Database`] handle that wraps a
//! `rusqlite::Connection` behind a mutex so a single handle can be shared
//! across concurrent request handlers, and provides typed CRUD helpers for
//! every domain model.  Schema migrations run before any other operation.

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod users;

mod error;

pub use chats::private_pair_key;
pub use database::Database;
pub use error::{Result, StoreError};
