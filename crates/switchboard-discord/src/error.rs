//! Error types for the Discord adapter.

use thiserror::Error;

/// Errors that can occur when talking to Discord.
#[derive(Debug, Error)]
pub enum DiscordError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Discord answered with a non-success status.
    #[error("Discord API error ({status}): {message}")]
    Api {
        status: u16,
        /// Discord's JSON error code, when the body carried one.
        code: Option<u64>,
        message: String,
    },

    /// Unknown guild, channel or message.
    #[error("not found: {0}")]
    NotFound(String),

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying, from the `retry_after` field.
        retry_after_secs: Option<f64>,
    },

    /// Token rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Invalid response from Discord.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl DiscordError {
    /// Whether this error means the requested entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DiscordError::NotFound(_))
    }
}
