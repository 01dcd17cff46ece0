//! Process-wide relay state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use switchboard_discord::ChatGateway;

use crate::channel_cache::{ChannelCache, DEFAULT_BACKFILL_LIMIT, DEFAULT_INCREMENTAL_LIMIT};
use crate::history::{DEFAULT_CAPACITY, HistoryStore};
use crate::stream_hub::{DEFAULT_STREAM_INTERVAL, StreamHub};

/// Tunables of the relay core.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// History file, rewritten on every append.
    pub history_path: PathBuf,
    /// Messages kept in the history file.
    pub history_capacity: usize,
    /// Messages fetched when a channel is first requested.
    pub backfill_limit: usize,
    /// Messages fetched per forward backfill.
    pub incremental_limit: usize,
    /// Interval between stream snapshots.
    pub stream_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            history_path: PathBuf::from("log/messages.json"),
            history_capacity: DEFAULT_CAPACITY,
            backfill_limit: DEFAULT_BACKFILL_LIMIT,
            incremental_limit: DEFAULT_INCREMENTAL_LIMIT,
            stream_interval: DEFAULT_STREAM_INTERVAL,
        }
    }
}

/// Shared handle to the history, the channel cache and the stream hub.
///
/// Cheap to clone; every clone sees the same state.
#[derive(Clone)]
pub struct Relay {
    history: Arc<HistoryStore>,
    channels: ChannelCache,
    hub: StreamHub,
    gateway: Arc<dyn ChatGateway>,
}

impl Relay {
    /// Load the history file and assemble the relay.
    ///
    /// Stream push loops stop once `shutdown` flips to `true`.
    pub async fn open(
        config: RelayConfig,
        gateway: Arc<dyn ChatGateway>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let history = HistoryStore::load(&config.history_path, config.history_capacity).await;
        info!(
            path = %config.history_path.display(),
            capacity = config.history_capacity,
            backfill_limit = config.backfill_limit,
            incremental_limit = config.incremental_limit,
            "relay ready"
        );

        Self {
            history: Arc::new(history),
            channels: ChannelCache::new(
                Arc::clone(&gateway),
                config.backfill_limit,
                config.incremental_limit,
            ),
            hub: StreamHub::new(config.stream_interval, shutdown),
            gateway,
        }
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn channels(&self) -> &ChannelCache {
        &self.channels
    }

    pub fn hub(&self) -> &StreamHub {
        &self.hub
    }

    pub fn gateway(&self) -> &Arc<dyn ChatGateway> {
        &self.gateway
    }
}
