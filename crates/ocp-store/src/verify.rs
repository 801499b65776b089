// SPDX-License-Identifier: MIT OR Apache-2.0

//! Audit verification: replay a stream, recompute the chain, report the
//! first mismatch. No events are mutated.

use ocp_core::{EventEnvelope, StreamKey, canonical_envelope, chain_hash};
use serde::{Deserialize, Serialize};

use crate::EventStore;

/// What went wrong at the first bad link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    /// `prev_event_hash` does not equal the predecessor's `event_hash`.
    PrevHashMismatch,
    /// The stored `event_hash` is null.
    EventHashMissing,
    /// The stored `event_hash` differs from the recomputed digest.
    EventHashMismatch,
}

/// Location and kind of the first chain mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    /// Sequence of the offending event.
    pub stream_seq: i64,
    /// Identifier of the offending event.
    pub event_id: String,
    /// What failed.
    pub kind: MismatchKind,
}

/// Result of an audit pass over one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Number of events examined before stopping.
    pub checked: usize,
    /// Whether every examined link held.
    pub valid: bool,
    /// The first mismatch, if any.
    pub first_mismatch: Option<Mismatch>,
    /// Hash of the last examined event, for resumable audits.
    pub last_event_hash: Option<String>,
}

/// Verify a slice of events already ordered by ascending `stream_seq`.
///
/// For index 0 the expected predecessor hash is `None`; afterwards it is
/// the previous event's stored hash. Verification stops at the first
/// mismatch.
#[must_use]
pub fn verify_events(events: &[EventEnvelope]) -> VerifyReport {
    let mut expected_prev: Option<String> = None;
    let mut last_event_hash: Option<String> = None;
    let mut checked = 0usize;

    for event in events {
        let mismatch_kind = check_event(event, expected_prev.as_deref());
        checked += 1;
        if let Some(kind) = mismatch_kind {
            return VerifyReport {
                checked,
                valid: false,
                first_mismatch: Some(Mismatch {
                    stream_seq: event.stream.stream_seq,
                    event_id: event.event_id.clone(),
                    kind,
                }),
                last_event_hash,
            };
        }
        expected_prev = event.event_hash.clone();
        last_event_hash = event.event_hash.clone();
    }

    VerifyReport {
        checked,
        valid: true,
        first_mismatch: None,
        last_event_hash,
    }
}

fn check_event(event: &EventEnvelope, expected_prev: Option<&str>) -> Option<MismatchKind> {
    if event.prev_event_hash.as_deref() != expected_prev {
        return Some(MismatchKind::PrevHashMismatch);
    }
    let Some(stored) = event.event_hash.as_deref() else {
        return Some(MismatchKind::EventHashMissing);
    };
    let canonical = match canonical_envelope(event) {
        Ok(c) => c,
        Err(_) => return Some(MismatchKind::EventHashMismatch),
    };
    let recomputed = chain_hash(&canonical, event.prev_event_hash.as_deref());
    if stored != recomputed {
        return Some(MismatchKind::EventHashMismatch);
    }
    None
}

impl EventStore {
    /// Audit the first `limit` events of a stream.
    #[must_use]
    pub fn verify_stream(&self, key: &StreamKey, limit: usize) -> VerifyReport {
        let events = self.read_stream(key, 0, limit);
        verify_events(&events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocp_core::{Actor, EventDraft};
    use serde_json::json;

    fn seeded_store(n: usize) -> (EventStore, StreamKey) {
        let store = EventStore::default();
        let key = StreamKey::room("r1");
        for i in 0..n {
            store
                .append(
                    EventDraft::new("message.created", "ws1", Actor::agent("ag1"))
                        .stream(key.clone())
                        .data(json!({"n": i})),
                )
                .unwrap();
        }
        (store, key)
    }

    #[test]
    fn untampered_log_is_valid() {
        let (store, key) = seeded_store(5);
        let report = store.verify_stream(&key, 100);
        assert!(report.valid);
        assert_eq!(report.checked, 5);
        assert!(report.first_mismatch.is_none());
        assert!(report.last_event_hash.is_some());
    }

    #[test]
    fn empty_stream_is_vacuously_valid() {
        let store = EventStore::default();
        let report = store.verify_stream(&StreamKey::room("nope"), 100);
        assert!(report.valid);
        assert_eq!(report.checked, 0);
        assert!(report.last_event_hash.is_none());
    }

    #[test]
    fn tampered_data_detected_at_offending_seq() {
        let (store, key) = seeded_store(3);
        let mut events = store.read_stream(&key, 0, 100);
        events[1].data = json!({"n": "tampered"});
        let report = verify_events(&events);
        assert!(!report.valid);
        let mismatch = report.first_mismatch.unwrap();
        assert_eq!(mismatch.stream_seq, 2);
        assert_eq!(mismatch.kind, MismatchKind::EventHashMismatch);
        assert_eq!(report.checked, 2);
    }

    #[test]
    fn broken_prev_link_detected() {
        let (store, key) = seeded_store(3);
        let mut events = store.read_stream(&key, 0, 100);
        events[2].prev_event_hash = Some("0".repeat(64));
        let report = verify_events(&events);
        let mismatch = report.first_mismatch.unwrap();
        assert_eq!(mismatch.stream_seq, 3);
        assert_eq!(mismatch.kind, MismatchKind::PrevHashMismatch);
    }

    #[test]
    fn missing_hash_detected() {
        let (store, key) = seeded_store(2);
        let mut events = store.read_stream(&key, 0, 100);
        events[1].event_hash = None;
        let report = verify_events(&events);
        assert_eq!(
            report.first_mismatch.unwrap().kind,
            MismatchKind::EventHashMissing
        );
    }

    #[test]
    fn limit_bounds_the_audit() {
        let (store, key) = seeded_store(10);
        let report = store.verify_stream(&key, 4);
        assert!(report.valid);
        assert_eq!(report.checked, 4);
    }

    proptest::proptest! {
        #[test]
        fn any_append_sequence_verifies(payloads in proptest::collection::vec(0u32..1000, 1..20)) {
            let store = EventStore::default();
            let key = StreamKey::room("r1");
            for p in &payloads {
                store
                    .append(
                        EventDraft::new("message.created", "ws1", Actor::agent("ag1"))
                            .stream(key.clone())
                            .data(json!({"n": p})),
                    )
                    .unwrap();
            }
            let report = store.verify_stream(&key, payloads.len() + 1);
            proptest::prop_assert!(report.valid);
            proptest::prop_assert_eq!(report.checked, payloads.len());
        }
    }

    #[test]
    fn mismatch_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&MismatchKind::EventHashMismatch).unwrap(),
            r#""event_hash_mismatch""#
        );
        assert_eq!(
            serde_json::to_string(&MismatchKind::PrevHashMismatch).unwrap(),
            r#""prev_hash_mismatch""#
        );
    }
}
