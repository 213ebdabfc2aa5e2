//! # parley-shared
//!
//! Domain models and wire protocol types shared between the Parley server
//! and its clients: id newtypes, the `User`/`Chat`/`Message` records, the
//! REST request/response DTOs, and the JSON frames spoken over the
//! WebSocket connection.

pub mod models;
pub mod protocol;
pub mod types;

pub use models::*;
pub use types::{ChatId, MessageId, UserId};
