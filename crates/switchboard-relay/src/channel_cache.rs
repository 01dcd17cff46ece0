//! Per-channel message cache with on-demand upstream backfill.
//!
//! A channel's entry is created on first access by fetching its most recent
//! messages. Later cursor queries that find nothing newer in the cache fetch
//! forward from the newest cached id and merge the result. Entries are kept
//! sorted by timestamp and never hold the same id twice.
//!
//! Each channel has its own async mutex, so backfills for one channel are
//! serialized while other channels proceed independently.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use switchboard_discord::{ChatGateway, Message};

use crate::RelayError;
use crate::history::filter_after;
use crate::timestamp;

/// Default size of the first backfill for a channel.
pub const DEFAULT_BACKFILL_LIMIT: usize = 10;

/// Default size of a forward (incremental) backfill.
pub const DEFAULT_INCREMENTAL_LIMIT: usize = 50;

/// `None` until the initial backfill succeeds.
type Slot = Arc<Mutex<Option<Vec<Message>>>>;

/// Lazily backfilled cache of channel messages.
#[derive(Clone)]
pub struct ChannelCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    gateway: Arc<dyn ChatGateway>,
    entries: DashMap<String, Slot>,
    backfill_limit: usize,
    incremental_limit: usize,
}

impl ChannelCache {
    pub fn new(gateway: Arc<dyn ChatGateway>, backfill_limit: usize, incremental_limit: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                gateway,
                entries: DashMap::new(),
                backfill_limit: backfill_limit.max(1),
                incremental_limit: incremental_limit.max(1),
            }),
        }
    }

    /// Messages of `channel_id`, optionally only those newer than `after`.
    ///
    /// Without a cursor the whole cached entry is returned in chronological
    /// order. With a cursor, the cached messages newer than it are returned;
    /// if there are none, the channel is backfilled forward and only the
    /// newly cached messages are returned.
    ///
    /// The work runs on its own task: if the caller goes away mid-fetch, the
    /// fetched messages are still cached.
    pub async fn get_messages(
        &self,
        channel_id: &str,
        after: Option<&str>,
    ) -> Result<Vec<Message>, RelayError> {
        let cursor = match after {
            Some(raw) => Some(
                timestamp::parse(raw)
                    .ok_or_else(|| RelayError::Validation(format!("invalid timestamp: {}", raw)))?,
            ),
            None => None,
        };

        let inner = Arc::clone(&self.inner);
        let channel_id = channel_id.to_string();
        tokio::spawn(async move { inner.get_messages(&channel_id, cursor).await })
            .await
            .map_err(|e| RelayError::Internal(format!("channel cache task failed: {}", e)))?
    }

    /// Current cached entry of a channel, if it has been backfilled.
    pub async fn cached(&self, channel_id: &str) -> Option<Vec<Message>> {
        let slot = self.inner.entries.get(channel_id).map(|s| Arc::clone(s.value()))?;
        let entry = slot.lock().await;
        entry.clone()
    }

    /// Number of channels with an entry.
    pub fn channel_count(&self) -> usize {
        self.inner.entries.len()
    }
}

impl CacheInner {
    fn slot(&self, channel_id: &str) -> Slot {
        let entry = self
            .entries
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)));
        // Clone the Arc so the shard lock is released before awaiting.
        Arc::clone(entry.value())
    }

    async fn get_messages(
        &self,
        channel_id: &str,
        cursor: Option<DateTime<FixedOffset>>,
    ) -> Result<Vec<Message>, RelayError> {
        let slot = self.slot(channel_id);
        let mut entry = slot.lock().await;

        if entry.is_none() {
            let initial = self.initial_backfill(channel_id).await?;
            *entry = Some(initial);
        }
        let cached = entry.get_or_insert_with(Vec::new);

        let Some(cursor) = cursor else {
            debug!(channel_id = %channel_id, count = cached.len(), "serving cached channel");
            return Ok(cached.clone());
        };

        let newer = filter_after(cached, cursor);
        if !newer.is_empty() {
            debug!(channel_id = %channel_id, count = newer.len(), "serving newer cached messages");
            return Ok(newer);
        }

        let fetched = match cached.last() {
            Some(last) => {
                debug!(channel_id = %channel_id, after_id = %last.id, "forward backfill");
                self.gateway
                    .fetch_after(channel_id, &last.id, self.incremental_limit)
                    .await?
            }
            None => {
                debug!(channel_id = %channel_id, "cached entry empty, refetching recent messages");
                let mut recent = self
                    .gateway
                    .fetch_recent(channel_id, self.backfill_limit)
                    .await?;
                recent.reverse();
                recent
            }
        };

        let fresh = merge(cached, fetched);
        if !fresh.is_empty() {
            info!(channel_id = %channel_id, count = fresh.len(), "cached new channel messages");
        }
        Ok(fresh)
    }

    async fn initial_backfill(&self, channel_id: &str) -> Result<Vec<Message>, RelayError> {
        let mut messages = self
            .gateway
            .fetch_recent(channel_id, self.backfill_limit)
            .await?;

        // Upstream delivers newest first.
        messages.reverse();
        let mut seen = HashSet::new();
        messages.retain(|m| seen.insert(m.id.clone()));
        messages.sort_by_cached_key(sort_key);

        info!(channel_id = %channel_id, count = messages.len(), "channel backfilled");
        Ok(messages)
    }
}

/// Merge `fetched` into `cached`, returning only the messages that were new.
///
/// Both the cache and the returned messages end up sorted by timestamp.
pub(crate) fn merge(cached: &mut Vec<Message>, fetched: Vec<Message>) -> Vec<Message> {
    let mut seen: HashSet<String> = cached.iter().map(|m| m.id.clone()).collect();
    let fetched_count = fetched.len();

    let mut fresh: Vec<Message> = fetched
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect();

    if fresh.len() < fetched_count {
        debug!(
            duplicates = fetched_count - fresh.len(),
            "dropped already cached messages"
        );
    }

    fresh.sort_by_cached_key(sort_key);
    cached.extend(fresh.iter().cloned());
    cached.sort_by_cached_key(sort_key);
    fresh
}

/// Unparsable timestamps sort first rather than poisoning the order.
fn sort_key(message: &Message) -> Option<DateTime<FixedOffset>> {
    let parsed = timestamp::parse(&message.timestamp);
    if parsed.is_none() {
        warn!(message_id = %message.id, timestamp = %message.timestamp, "unparsable cached timestamp");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use switchboard_discord::{ChannelSummary, DiscordError, GuildSummary};

    fn message(id: u32) -> Message {
        Message {
            id: id.to_string(),
            author: "ada".to_string(),
            content: format!("message {}", id),
            timestamp: format!("2024-05-01T12:{:02}:{:02}+00:00", id / 60, id % 60),
            channel_id: "123".to_string(),
            channel_name: "general".to_string(),
            guild_id: None,
            guild_name: None,
            attachments: vec![],
        }
    }

    fn cursor_for(id: u32) -> String {
        message(id).timestamp
    }

    fn ids(messages: &[Message]) -> Vec<String> {
        messages.iter().map(|m| m.id.clone()).collect()
    }

    /// In-memory channel whose history the tests can extend.
    #[derive(Default)]
    struct FakeGateway {
        /// Chronological.
        history: StdMutex<Vec<Message>>,
        recent_calls: AtomicUsize,
        after_calls: AtomicUsize,
        delay: Option<Duration>,
        /// Restricts `delay` to this channel.
        slow_channel: Option<String>,
        fail: bool,
    }

    impl FakeGateway {
        fn with_history(ids: impl IntoIterator<Item = u32>) -> Self {
            Self {
                history: StdMutex::new(ids.into_iter().map(message).collect()),
                ..Default::default()
            }
        }

        fn post(&self, id: u32) {
            self.history.lock().unwrap().push(message(id));
        }
    }

    #[async_trait]
    impl ChatGateway for FakeGateway {
        async fn fetch_recent(
            &self,
            channel_id: &str,
            limit: usize,
        ) -> Result<Vec<Message>, DiscordError> {
            self.recent_calls.fetch_add(1, Ordering::SeqCst);
            let stalled = self
                .slow_channel
                .as_deref()
                .is_none_or(|slow| slow == channel_id);
            if let (Some(delay), true) = (self.delay, stalled) {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(DiscordError::WebSocket("gateway down".to_string()));
            }
            let history = self.history.lock().unwrap();
            Ok(history.iter().rev().take(limit).cloned().collect())
        }

        async fn fetch_after(
            &self,
            _channel_id: &str,
            after_id: &str,
            limit: usize,
        ) -> Result<Vec<Message>, DiscordError> {
            self.after_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DiscordError::WebSocket("gateway down".to_string()));
            }
            let after: u32 = after_id.parse().unwrap();
            let history = self.history.lock().unwrap();
            Ok(history
                .iter()
                .filter(|m| m.id.parse::<u32>().unwrap() > after)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn send(&self, _channel_id: &str, _content: &str) -> Result<(), DiscordError> {
            Ok(())
        }

        async fn list_guilds(&self) -> Result<Vec<GuildSummary>, DiscordError> {
            Ok(vec![])
        }

        async fn list_channels(&self, guild_id: &str) -> Result<Vec<ChannelSummary>, DiscordError> {
            Err(DiscordError::NotFound(guild_id.to_string()))
        }

        async fn find_channel(
            &self,
            _channel_id: &str,
        ) -> Result<Option<ChannelSummary>, DiscordError> {
            Ok(None)
        }
    }

    fn cache_over(gateway: &Arc<FakeGateway>) -> ChannelCache {
        ChannelCache::new(
            Arc::clone(gateway) as Arc<dyn ChatGateway>,
            DEFAULT_BACKFILL_LIMIT,
            DEFAULT_INCREMENTAL_LIMIT,
        )
    }

    #[tokio::test]
    async fn test_first_access_backfills_once_in_chronological_order() {
        let gateway = Arc::new(FakeGateway::with_history(1..=25));
        let cache = cache_over(&gateway);

        let messages = cache.get_messages("123", None).await.unwrap();

        assert_eq!(gateway.recent_calls.load(Ordering::SeqCst), 1);
        assert_eq!(messages.len(), 10);
        assert_eq!(ids(&messages), ids(&(16..=25).map(message).collect::<Vec<_>>()));

        // Served from cache afterwards.
        cache.get_messages("123", None).await.unwrap();
        assert_eq!(gateway.recent_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cursor_served_from_cache_when_newer_exist() {
        let gateway = Arc::new(FakeGateway::with_history(1..=5));
        let cache = cache_over(&gateway);

        let newer = cache
            .get_messages("123", Some(&cursor_for(3)))
            .await
            .unwrap();

        assert_eq!(ids(&newer), vec!["4", "5"]);
        assert_eq!(gateway.after_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cursor_with_nothing_newer_backfills_forward() {
        let gateway = Arc::new(FakeGateway::with_history(1..=5));
        let cache = cache_over(&gateway);
        cache.get_messages("123", None).await.unwrap();

        gateway.post(6);
        gateway.post(7);

        let fresh = cache
            .get_messages("123", Some(&cursor_for(5)))
            .await
            .unwrap();

        assert_eq!(ids(&fresh), vec!["6", "7"]);
        assert_eq!(gateway.after_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            ids(&cache.cached("123").await.unwrap()),
            vec!["1", "2", "3", "4", "5", "6", "7"]
        );
    }

    #[tokio::test]
    async fn test_forward_backfill_with_nothing_new_is_empty() {
        let gateway = Arc::new(FakeGateway::with_history(1..=3));
        let cache = cache_over(&gateway);

        let fresh = cache
            .get_messages("123", Some(&cursor_for(3)))
            .await
            .unwrap();

        assert!(fresh.is_empty());
        assert_eq!(cache.cached("123").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_malformed_cursor_is_validation_error_without_fetch() {
        let gateway = Arc::new(FakeGateway::with_history(1..=3));
        let cache = cache_over(&gateway);

        let err = cache
            .get_messages("123", Some("not-a-date"))
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Validation(_)));
        assert_eq!(gateway.recent_calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_upstream_failure_propagates_and_is_retried() {
        let gateway = Arc::new(FakeGateway {
            fail: true,
            ..FakeGateway::with_history(1..=3)
        });
        let cache = cache_over(&gateway);

        let err = cache.get_messages("123", None).await.unwrap_err();
        assert!(matches!(err, RelayError::Upstream(_)));
        assert!(cache.cached("123").await.is_none());

        cache.get_messages("123", None).await.unwrap_err();
        assert_eq!(gateway.recent_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_channel_refetches_recent() {
        let gateway = Arc::new(FakeGateway::default());
        let cache = cache_over(&gateway);
        assert!(cache.get_messages("123", None).await.unwrap().is_empty());

        gateway.post(1);
        let fresh = cache
            .get_messages("123", Some(&cursor_for(0)))
            .await
            .unwrap();

        assert_eq!(ids(&fresh), vec!["1"]);
        assert_eq!(gateway.after_calls.load(Ordering::SeqCst), 0);
        assert_eq!(gateway.recent_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_access_backfills_once() {
        let gateway = Arc::new(FakeGateway {
            delay: Some(Duration::from_millis(50)),
            ..FakeGateway::with_history(1..=5)
        });
        let cache = cache_over(&gateway);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_messages("123", None).await })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().len(), 5);
        }
        assert_eq!(gateway.recent_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let gateway = Arc::new(FakeGateway::with_history(1..=3));
        let cache = cache_over(&gateway);

        cache.get_messages("a", None).await.unwrap();
        cache.get_messages("b", None).await.unwrap();

        assert_eq!(cache.channel_count(), 2);
        assert_eq!(gateway.recent_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_channel_does_not_block_others() {
        let gateway = Arc::new(FakeGateway {
            delay: Some(Duration::from_secs(3600)),
            slow_channel: Some("slow".to_string()),
            ..FakeGateway::with_history(1..=3)
        });
        let cache = cache_over(&gateway);

        let stalled = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_messages("slow", None).await })
        };
        while gateway.recent_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let fast = tokio::time::timeout(Duration::from_secs(1), cache.get_messages("fast", None))
            .await
            .expect("fast channel waited on the slow one")
            .unwrap();
        assert_eq!(ids(&fast), vec!["1", "2", "3"]);
        assert!(!stalled.is_finished());

        let slow = stalled.await.unwrap().unwrap();
        assert_eq!(ids(&slow), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_merge_drops_duplicates_and_sorts() {
        let mut cached = vec![message(1), message(3)];
        let fresh = merge(&mut cached, vec![message(4), message(3), message(2), message(4)]);

        assert_eq!(ids(&fresh), vec!["2", "4"]);
        assert_eq!(ids(&cached), vec!["1", "2", "3", "4"]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // The cache grows by exactly the ids it did not already hold
            #[test]
            fn merge_adds_only_unseen_ids(
                cached_ids in prop::collection::btree_set(0u32..200, 0..30),
                fetched_ids in prop::collection::vec(0u32..200, 0..30),
            ) {
                let mut cached: Vec<Message> = cached_ids.iter().copied().map(message).collect();
                let before: HashSet<u32> = cached_ids.iter().copied().collect();

                let fresh = merge(&mut cached, fetched_ids.iter().copied().map(message).collect());

                let unseen: HashSet<u32> = fetched_ids
                    .iter()
                    .copied()
                    .filter(|id| !before.contains(id))
                    .collect();
                prop_assert_eq!(fresh.len(), unseen.len());
                prop_assert_eq!(cached.len(), before.len() + unseen.len());

                let unique: HashSet<&str> = cached.iter().map(|m| m.id.as_str()).collect();
                prop_assert_eq!(unique.len(), cached.len());

                let keys: Vec<u32> = cached.iter().map(|m| m.id.parse().unwrap()).collect();
                prop_assert!(keys.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}
