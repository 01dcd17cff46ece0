//! Live stream subscribers and their snapshot push loops.
//!
//! Every subscriber gets its own task that pushes the complete history
//! immediately and then once per interval. Snapshots are never deltas, so a
//! client can resynchronize from any single one. The loop stops as soon as the
//! receiving side is dropped or the process shuts down, and the subscriber is
//! deregistered exactly once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};
use uuid::Uuid;

use switchboard_discord::Message;

use crate::history::HistoryStore;

/// Default push interval.
pub const DEFAULT_STREAM_INTERVAL: Duration = Duration::from_secs(1);

type ActiveSet = Arc<Mutex<HashSet<Uuid>>>;

/// A complete copy of the history as sent to one subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub messages: Vec<Message>,
}

/// Registry of live stream connections.
#[derive(Debug, Clone)]
pub struct StreamHub {
    active: ActiveSet,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl StreamHub {
    pub fn new(interval: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            active: Arc::new(Mutex::new(HashSet::new())),
            interval,
            shutdown,
        }
    }

    /// Register a new subscriber under a fresh id.
    pub fn subscribe(&self) -> Subscription {
        let mut active = lock(&self.active);
        let id = loop {
            let candidate = Uuid::new_v4();
            if active.insert(candidate) {
                break candidate;
            }
        };
        debug!(subscriber = %id, active = active.len(), "stream subscriber registered");

        Subscription {
            id,
            active: Arc::clone(&self.active),
            released: AtomicBool::new(false),
        }
    }

    /// Number of registered subscribers.
    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }

    pub fn is_active(&self, id: &Uuid) -> bool {
        lock(&self.active).contains(id)
    }

    /// Register a subscriber and start its push loop over `history`.
    ///
    /// Dropping the returned feed tears the subscriber down.
    pub fn spawn_feed(&self, history: Arc<HistoryStore>) -> SnapshotFeed {
        let subscription = self.subscribe();
        let id = subscription.id();
        // One slot: a slow client gets the latest snapshot, not a backlog.
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(push_loop(
            subscription,
            history,
            tx,
            self.interval,
            self.shutdown.clone(),
        ));

        SnapshotFeed { id, rx }
    }
}

/// Registration handle of one subscriber.
///
/// Deregisters on [`close`](Subscription::close) or drop, whichever comes
/// first; later calls are no-ops.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    active: ActiveSet,
    released: AtomicBool,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Deregister. Returns `true` only for the call that removed the entry.
    pub fn close(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        let mut active = lock(&self.active);
        let removed = active.remove(&self.id);
        debug!(subscriber = %self.id, active = active.len(), "stream subscriber deregistered");
        removed
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Receiving end of a subscriber's snapshots.
#[derive(Debug)]
pub struct SnapshotFeed {
    id: Uuid,
    rx: mpsc::Receiver<Snapshot>,
}

impl SnapshotFeed {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next snapshot, or `None` once the push loop has stopped.
    pub async fn recv(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }

    pub fn into_receiver(self) -> mpsc::Receiver<Snapshot> {
        self.rx
    }
}

async fn push_loop(
    subscription: Subscription,
    history: Arc<HistoryStore>,
    tx: mpsc::Sender<Snapshot>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let id = subscription.id();
    info!(subscriber = %id, "stream subscriber connected");

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Without a sender nobody can ask us to stop; rely on disconnects alone.
    let mut shutdown_open = true;

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            biased;

            _ = tx.closed() => {
                trace!(subscriber = %id, "stream receiver dropped");
                break;
            }

            changed = shutdown.changed(), if shutdown_open => {
                if changed.is_err() {
                    shutdown_open = false;
                }
            }

            _ = ticker.tick() => {
                let snapshot = Snapshot { messages: history.snapshot().await };
                match tx.try_send(snapshot) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        trace!(subscriber = %id, "previous snapshot not consumed, skipping tick");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        }
    }

    subscription.close();
    info!(subscriber = %id, "stream subscriber disconnected");
}

/// Every critical section is a single insert or remove, so a poisoned set is
/// still consistent.
fn lock(active: &ActiveSet) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
