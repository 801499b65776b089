// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Live stream fan-out.
//!
//! A subscription tails one stream from a client-supplied sequence,
//! pushing ordered batches of at most 100 events and sleeping ~1 s when
//! idle. The cursor is monotone, each committed event is delivered exactly
//! once per subscription, and there is no gap-filling: clients resume with
//! the last `stream_seq` they saw.

use std::time::Duration;

use ocp_core::{EventEnvelope, StreamKey};
use ocp_store::EventStore;
use tokio::sync::mpsc;

/// Tuning for a tail loop.
#[derive(Debug, Clone, Copy)]
pub struct TailSettings {
    /// Maximum events per pushed batch.
    pub batch_size: usize,
    /// Sleep between polls when the stream has no new events.
    pub idle_poll: Duration,
    /// Buffered batches before the producer blocks.
    pub channel_capacity: usize,
}

impl Default for TailSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            idle_poll: Duration::from_secs(1),
            channel_capacity: 16,
        }
    }
}

/// Factory for tail subscriptions over one store.
#[derive(Debug, Clone)]
pub struct StreamTail {
    store: EventStore,
    settings: TailSettings,
}

impl StreamTail {
    /// Tail with default settings.
    #[must_use]
    pub fn new(store: EventStore) -> Self {
        Self::with_settings(store, TailSettings::default())
    }

    /// Tail with custom settings.
    #[must_use]
    pub fn with_settings(store: EventStore, settings: TailSettings) -> Self {
        Self { store, settings }
    }

    /// Open a subscription on a stream, resuming after `from_seq`.
    ///
    /// The producer task runs until the subscription is dropped.
    #[must_use]
    pub fn subscribe(&self, key: StreamKey, from_seq: i64) -> TailSubscription {
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity);
        let store = self.store.clone();
        let settings = self.settings;
        tokio::spawn(async move {
            let mut cursor = from_seq.max(0);
            while !tx.is_closed() {
                let batch = store.read_stream(&key, cursor, settings.batch_size);
                if batch.is_empty() {
                    tokio::time::sleep(settings.idle_poll).await;
                    continue;
                }
                cursor = batch
                    .last()
                    .map(|e| e.stream.stream_seq)
                    .unwrap_or(cursor);
                if tx.send(batch).await.is_err() {
                    // Subscriber went away.
                    break;
                }
            }
            tracing::debug!(stream_id = %key.stream_id, "tail subscription closed");
        });
        TailSubscription { receiver: rx }
    }
}

/// A live subscription. Dropping it terminates the producer on its next
/// poll.
#[derive(Debug)]
pub struct TailSubscription {
    receiver: mpsc::Receiver<Vec<EventEnvelope>>,
}

impl TailSubscription {
    /// Receive the next batch; `None` after the subscription closes.
    pub async fn recv(&mut self) -> Option<Vec<EventEnvelope>> {
        self.receiver.recv().await
    }

    /// Take the underlying receiver, e.g. to bridge into an SSE response.
    #[must_use]
    pub fn into_receiver(self) -> mpsc::Receiver<Vec<EventEnvelope>> {
        self.receiver
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
