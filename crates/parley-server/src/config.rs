//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Fallback signing secret for local development only.
const DEV_TOKEN_SECRET: &str = "parley-dev-secret";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the SQLite database.
    /// Env: `DATABASE_PATH`
    /// Default: `./data/parley.db`
    pub database_path: PathBuf,

    /// HMAC secret used to sign and verify access tokens.
    /// Env: `TOKEN_SECRET`
    /// Default: a development-only constant.
    pub token_secret: String,

    /// Access token lifetime in hours.
    /// Env: `TOKEN_TTL_HOURS`
    /// Default: `24`
    pub token_ttl_hours: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            database_path: PathBuf::from("./data/parley.db"),
            token_secret: DEV_TOKEN_SECRET.to_string(),
            token_ttl_hours: 24,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        match std::env::var("TOKEN_SECRET") {
            Ok(secret) if !secret.is_empty() => config.token_secret = secret,
            _ => {
                tracing::warn!("TOKEN_SECRET not set, using development default");
            }
        }

        if let Ok(val) = std::env::var("TOKEN_TTL_HOURS") {
            if let Ok(hours) = val.parse::<i64>() {
                config.token_ttl_hours = hours;
            } else {
                tracing::warn!(value = %val, "Invalid TOKEN_TTL_HOURS, using default");
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
