//! Error taxonomy of the relay core.

use thiserror::Error;

use switchboard_discord::DiscordError;

/// Errors surfaced by relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Unknown guild or channel.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller supplied something unusable (missing field, malformed cursor).
    #[error("invalid request: {0}")]
    Validation(String),

    /// The chat platform failed a fetch or send.
    #[error("upstream error: {0}")]
    Upstream(DiscordError),

    /// Local history storage failed. Logged and absorbed by the history store.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A background task died before producing a result.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DiscordError> for RelayError {
    fn from(err: DiscordError) -> Self {
        match err {
            DiscordError::NotFound(what) => RelayError::NotFound(what),
            other => RelayError::Upstream(other),
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Persistence(err.to_string())
    }
}
