//! # parley-server
//!
//! Real-time direct-messaging backend.
//!
//! This crate provides:
//! - **REST API** (axum) for signup/login, message send, chat history, and
//!   user directory lookups
//! - **WebSocket endpoint** carrying topic-subscribe and live message frames
//! - **SQLite persistence**: every message is durable before any subscriber
//!   sees it
//! - **Bearer-token auth** (JWT) on the REST surface; soft-fail on the
//!   WebSocket handshake

pub mod api;
pub mod auth;
pub mod broker;
pub mod chats;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ws;
