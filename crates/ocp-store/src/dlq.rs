// SPDX-License-Identifier: MIT OR Apache-2.0

//! Poison-message queue for failed projector applications.
//!
//! Projectors run after the append commits; the log is the source of
//! truth, so a projector failure never rolls an event back. The failure is
//! parked here, keyed by `event_id` (and the client's idempotency key when
//! available) so a re-projection pass can drain it.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One parked projector failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The event whose projection failed.
    pub event_id: String,
    /// The client idempotency key, when the event carried one.
    pub idempotency_key: Option<String>,
    /// Name of the projector that failed.
    pub projector: String,
    /// Sanitized failure description.
    pub error: String,
    /// When the failure was parked.
    pub at: DateTime<Utc>,
}

/// Shared in-process dead-letter queue.
#[derive(Debug, Clone, Default)]
pub struct DeadLetterQueue {
    inner: Arc<Mutex<Vec<DeadLetter>>>,
}

impl DeadLetterQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a failure.
    pub fn push(&self, letter: DeadLetter) {
        tracing::warn!(
            event_id = %letter.event_id,
            projector = %letter.projector,
            error = %letter.error,
            "projector failure parked in dead-letter queue"
        );
        self.inner.lock().expect("dlq lock poisoned").push(letter);
    }

    /// Drain all parked failures, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<DeadLetter> {
        let mut guard = self.inner.lock().expect("dlq lock poisoned");
        std::mem::take(&mut *guard)
    }

    /// Number of parked failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("dlq lock poisoned").len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
