//! Progress events via an in-process broadcast channel.

use std::pin::Pin;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use genbatch_models::{BatchEvent, BatchId, ProgressSnapshot};

/// Default number of events buffered per subscriber before it starts lagging.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Progress event published to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Batch the event belongs to
    pub batch_id: BatchId,
    pub event: BatchEvent,
}

/// Channel for publishing/subscribing to progress events.
///
/// Cloning yields another handle on the same channel. Publishing never
/// blocks the run loop; slow subscribers lose the oldest events.
#[derive(Debug, Clone)]
pub struct ProgressChannel {
    tx: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl ProgressChannel {
    /// Create a new progress channel.
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    /// Publish an event. Returns the number of subscribers that received it.
    pub fn publish(&self, batch_id: &BatchId, event: BatchEvent) -> usize {
        debug!(batch_id = %batch_id, kind = event.kind(), "Publishing progress event");
        self.tx
            .send(ProgressEvent {
                batch_id: batch_id.clone(),
                event,
            })
            .unwrap_or(0)
    }

    /// Publish a progress snapshot.
    pub fn progress(&self, batch_id: &BatchId, snapshot: ProgressSnapshot) -> usize {
        self.publish(batch_id, BatchEvent::progress(snapshot))
    }

    /// Subscribe to all subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Subscribe as a stream that skips over lag gaps.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub fn subscribe_stream(&self) -> Pin<Box<dyn Stream<Item = ProgressEvent> + Send>> {
        let rx = self.tx.subscribe();
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Progress subscriber lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Box::pin(stream)
    }
}
