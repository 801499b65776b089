// SPDX-License-Identifier: MIT OR Apache-2.0

//! The event store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ocp_core::canonical::CanonicalError;
use ocp_core::{
    CLOCK_SKEW_TOLERANCE_MS, EventDraft, EventEnvelope, SharedClock, StreamKey, canonical_envelope,
    chain_hash, system_clock,
};
use thiserror::Error;

/// Errors surfaced by [`EventStore::append`].
#[derive(Debug, Error)]
pub enum AppendError {
    /// Another event already holds `(workspace_id, event_type,
    /// idempotency_key)`. Callers resolve by lookup, not retry.
    #[error("idempotency key already committed by event {existing_event_id}")]
    IdempotencyUniqueViolation {
        /// The event that holds the key.
        existing_event_id: String,
    },
    /// `occurred_at` is further ahead of `recorded_at` than the tolerated
    /// clock skew.
    #[error("occurred_at exceeds recorded_at by more than {tolerance_ms} ms")]
    ClockSkewExceeded {
        /// Tolerance that was applied, in milliseconds.
        tolerance_ms: i64,
    },
    /// The envelope could not be canonically encoded.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

type IdempotencyKey = (String, String, String);

#[derive(Default)]
struct Inner {
    /// Commit order. Per stream this is also `stream_seq` order.
    events: Vec<EventEnvelope>,
    by_stream: HashMap<StreamKey, Vec<usize>>,
    by_event_id: HashMap<String, usize>,
    idempotency: HashMap<IdempotencyKey, usize>,
}

/// The append-only event log.
///
/// Clones share state. Appends are serialized on the interior lock, which
/// is the process-local equivalent of the sequence-claim row lock: no two
/// appenders can read the same per-stream maximum.
#[derive(Clone)]
pub struct EventStore {
    inner: Arc<Mutex<Inner>>,
    clock: SharedClock,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("events", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(system_clock())
    }
}

impl EventStore {
    /// Create an empty store driven by the given clock.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            clock,
        }
    }

    /// Append a draft, completing it with `stream_seq`, `recorded_at`,
    /// `prev_event_hash`, and `event_hash`.
    ///
    /// Guarantees: a dense per-stream sequence starting at 1, prev-hash
    /// linkage to the stream's previous event, a chain hash over the
    /// canonical form, idempotency uniqueness per `(workspace, event_type,
    /// key)`, and the clock skew bound.
    ///
    /// # Errors
    ///
    /// [`AppendError::IdempotencyUniqueViolation`] when the key is already
    /// committed; [`AppendError::ClockSkewExceeded`] on an `occurred_at`
    /// too far in the future; [`AppendError::Canonical`] if the envelope
    /// cannot be encoded.
    pub fn append(&self, draft: EventDraft) -> Result<EventEnvelope, AppendError> {
        let recorded_at = self.clock.now();
        if let Some(occurred_at) = draft.occurred_at {
            let ahead_ms = (occurred_at - recorded_at).num_milliseconds();
            if ahead_ms > CLOCK_SKEW_TOLERANCE_MS {
                return Err(AppendError::ClockSkewExceeded {
                    tolerance_ms: CLOCK_SKEW_TOLERANCE_MS,
                });
            }
        }

        let mut guard = self.inner.lock().expect("event store lock poisoned");
        let inner = &mut *guard;

        if let Some(key) = draft.idempotency_key.clone() {
            let idem = (draft.workspace_id.clone(), draft.event_type.clone(), key);
            if let Some(&idx) = inner.idempotency.get(&idem) {
                return Err(AppendError::IdempotencyUniqueViolation {
                    existing_event_id: inner.events[idx].event_id.clone(),
                });
            }
        }

        let stream_key = draft.stream.clone();
        let stream_indices = inner.by_stream.get(&stream_key);
        let next_seq = stream_indices.map_or(0, Vec::len) as i64 + 1;
        let prev_hash = stream_indices
            .and_then(|v| v.last())
            .map(|&idx| inner.events[idx].event_hash.clone().unwrap_or_default());

        let mut envelope = draft.into_envelope(next_seq, recorded_at);
        let canonical = canonical_envelope(&envelope)?;
        envelope.prev_event_hash = prev_hash;
        envelope.event_hash = Some(chain_hash(&canonical, envelope.prev_event_hash.as_deref()));

        let idx = inner.events.len();
        if let Some(key) = envelope.idempotency_key.clone() {
            inner.idempotency.insert(
                (
                    envelope.workspace_id.clone(),
                    envelope.event_type.clone(),
                    key,
                ),
                idx,
            );
        }
        inner.by_event_id.insert(envelope.event_id.clone(), idx);
        inner.by_stream.entry(stream_key).or_default().push(idx);
        inner.events.push(envelope.clone());

        tracing::debug!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            stream_id = %envelope.stream.stream_id,
            stream_seq = envelope.stream.stream_seq,
            "event appended"
        );
        Ok(envelope)
    }

    /// Events of a stream with `stream_seq > after_seq`, ascending, at most
    /// `limit` rows.
    #[must_use]
    pub fn read_stream(&self, key: &StreamKey, after_seq: i64, limit: usize) -> Vec<EventEnvelope> {
        let inner = self.inner.lock().expect("event store lock poisoned");
        let Some(indices) = inner.by_stream.get(key) else {
            return Vec::new();
        };
        indices
            .iter()
            .map(|&idx| &inner.events[idx])
            .filter(|e| e.stream.stream_seq > after_seq)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Look up a committed event by `(workspace_id, event_type,
    /// idempotency_key)`.
    #[must_use]
    pub fn find_by_idempotency(
        &self,
        workspace_id: &str,
        event_type: &str,
        idempotency_key: &str,
    ) -> Option<EventEnvelope> {
        let inner = self.inner.lock().expect("event store lock poisoned");
        inner
            .idempotency
            .get(&(
                workspace_id.to_string(),
                event_type.to_string(),
                idempotency_key.to_string(),
            ))
            .map(|&idx| inner.events[idx].clone())
    }

    /// Look up an event by its id.
    #[must_use]
    pub fn get(&self, event_id: &str) -> Option<EventEnvelope> {
        let inner = self.inner.lock().expect("event store lock poisoned");
        inner
            .by_event_id
            .get(event_id)
            .map(|&idx| inner.events[idx].clone())
    }

    /// All events of a workspace in `(recorded_at, stream_seq)` order, the
    /// projection rebuild order.
    #[must_use]
    pub fn workspace_events(&self, workspace_id: &str) -> Vec<EventEnvelope> {
        let inner = self.inner.lock().expect("event store lock poisoned");
        let mut events: Vec<EventEnvelope> = inner
            .events
            .iter()
            .filter(|e| e.workspace_id == workspace_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then(a.stream.stream_seq.cmp(&b.stream.stream_seq))
        });
        events
    }

    /// Total number of committed events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("event store lock poisoned").events.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
