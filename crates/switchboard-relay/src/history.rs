//! Bounded, file-backed history of inbound messages.
//!
//! The in-memory log holds every message seen by this process in arrival
//! order. Each append rewrites the history file with only the newest
//! `capacity` entries, so older messages do not survive a restart.

use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use switchboard_discord::Message;

use crate::RelayError;
use crate::timestamp;

/// Default number of messages kept in the history file.
pub const DEFAULT_CAPACITY: usize = 100;

/// Ordered, append-only message log.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    capacity: usize,
    messages: RwLock<Vec<Message>>,
}

impl HistoryStore {
    /// An empty store persisting to `path`.
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity: capacity.max(1),
            messages: RwLock::new(Vec::new()),
        }
    }

    /// Load the history file at `path`.
    ///
    /// Never fails: a missing, unreadable or corrupt file yields an empty
    /// history and a log line.
    pub async fn load(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let store = Self::new(path, capacity);

        match read_history_file(&store.path).await {
            Ok(Some(messages)) => {
                info!(
                    path = %store.path.display(),
                    count = messages.len(),
                    "loaded message history"
                );
                *store.messages.write().await = messages;
            }
            Ok(None) => {
                info!(path = %store.path.display(), "no history file, starting empty");
            }
            Err(e) => {
                error!(
                    path = %store.path.display(),
                    error = %e,
                    "failed to load message history, starting empty"
                );
            }
        }

        store
    }

    /// Append a message and rewrite the history file.
    ///
    /// A failed write is logged; the in-memory log stays authoritative.
    pub async fn append(&self, message: Message) {
        let mut messages = self.messages.write().await;
        debug!(message_id = %message.id, channel_id = %message.channel_id, "history append");
        messages.push(message);

        // Readers may proceed while the file is written; other appends wait,
        // so files are written in append order.
        let messages = messages.downgrade();
        let start = messages.len().saturating_sub(self.capacity);
        if let Err(e) = self.persist(&messages[start..]).await {
            error!(path = %self.path.display(), error = %e, "failed to persist message history");
        }
    }

    /// Messages in arrival order, optionally only those newer than `after`.
    ///
    /// A malformed cursor yields an empty result. Messages whose own
    /// timestamp cannot be parsed are skipped individually.
    pub async fn query(&self, after: Option<&str>) -> Vec<Message> {
        let Some(raw) = after else {
            return self.snapshot().await;
        };

        let Some(cursor) = timestamp::parse(raw) else {
            warn!(cursor = %raw, "malformed history cursor");
            return Vec::new();
        };

        let messages = self.messages.read().await;
        let newer = filter_after(&messages, cursor);
        debug!(cursor = %raw, count = newer.len(), "history query");
        newer
    }

    /// The full in-memory history.
    pub async fn snapshot(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    /// Number of messages held in memory.
    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }

    /// Write `messages` to a sibling temp file and rename it into place.
    async fn persist(&self, messages: &[Message]) -> Result<(), RelayError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(messages)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), count = messages.len(), "persisted message history");
        Ok(())
    }
}

/// Messages strictly newer than `cursor`, in their original order.
pub(crate) fn filter_after(messages: &[Message], cursor: DateTime<FixedOffset>) -> Vec<Message> {
    messages
        .iter()
        .filter(|msg| match timestamp::parse(&msg.timestamp) {
            Some(ts) => ts > cursor,
            None => {
                warn!(
                    message_id = %msg.id,
                    timestamp = %msg.timestamp,
                    "skipping message with unparsable timestamp"
                );
                false
            }
        })
        .cloned()
        .collect()
}

async fn read_history_file(path: &Path) -> Result<Option<Vec<Message>>, RelayError> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&content)?))
}
