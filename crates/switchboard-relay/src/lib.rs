//! Live message distribution core for switchboard.
//!
//! - [`HistoryStore`]: bounded, file-backed log of inbound messages with
//!   timestamp-cursor queries
//! - [`ChannelCache`]: per-channel pages backfilled on demand from the
//!   upstream [`ChatGateway`](switchboard_discord::ChatGateway)
//! - [`StreamHub`]: registry of live stream subscribers and their periodic
//!   snapshot push loops
//! - [`Relay`]: owns all of the above for the lifetime of the process

mod channel_cache;
mod error;
mod history;
mod relay;
mod stream_hub;
pub mod timestamp;

pub use channel_cache::{ChannelCache, DEFAULT_BACKFILL_LIMIT, DEFAULT_INCREMENTAL_LIMIT};
pub use error::RelayError;
pub use history::{DEFAULT_CAPACITY, HistoryStore};
pub use relay::{Relay, RelayConfig};
pub use stream_hub::{DEFAULT_STREAM_INTERVAL, Snapshot, SnapshotFeed, StreamHub, Subscription};
