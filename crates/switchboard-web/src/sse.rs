//! Server-Sent Events for the live snapshot stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use switchboard_relay::SnapshotFeed;

/// Idle time after which a comment frame keeps the connection open.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Turn a subscriber's feed into an SSE response.
///
/// Each snapshot becomes one `data: {"messages": [...]}` event. When the
/// client goes away the stream, and with it the feed, is dropped, which stops
/// the push loop.
pub fn snapshot_stream(
    feed: SnapshotFeed,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let subscriber = feed.id();
    let stream = ReceiverStream::new(feed.into_receiver()).filter_map(move |snapshot| {
        match Event::default().json_data(&snapshot) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!(subscriber = %subscriber, error = %e, "failed to encode snapshot");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}
