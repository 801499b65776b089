// SPDX-License-Identifier: MIT OR Apache-2.0

//! The projection engine: applies every registered projector to each
//! appended event, once, and parks failures in the dead-letter queue.

use std::fmt;
use std::sync::{Arc, RwLock};

use ocp_core::EventEnvelope;
use ocp_store::{DeadLetter, DeadLetterQueue};
use thiserror::Error;

use crate::reducers;
use crate::state::ProjectionState;

/// Reducer failures. These never roll back the append.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    /// A required field is missing or has the wrong type in `data`.
    #[error("event {event_id} has malformed data: missing or invalid `{field}`")]
    MalformedData {
        /// Offending event.
        event_id: String,
        /// The field that failed extraction.
        field: String,
    },
    /// The event references an entity the projection does not know.
    #[error("event {event_id} references unknown {entity} `{entity_id}`")]
    UnknownEntity {
        /// Offending event.
        event_id: String,
        /// Entity kind, e.g. `incident`.
        entity: &'static str,
        /// Referenced identifier.
        entity_id: String,
    },
}

/// A pure, idempotent reducer.
pub trait Projector: Send + Sync {
    /// Stable projector name, used in the idempotence fence and the DLQ.
    fn name(&self) -> &'static str;

    /// Fold one event into the state. Must be a no-op for events the
    /// projector does not handle, and idempotent for re-applied events.
    ///
    /// # Errors
    ///
    /// A [`ProjectionError`] when the event is malformed for this reducer.
    fn apply(&self, event: &EventEnvelope, state: &mut ProjectionState)
    -> Result<(), ProjectionError>;
}

/// The standard projector set, in apply order.
#[must_use]
pub fn default_projectors() -> Vec<Box<dyn Projector>> {
    vec![
        Box::new(reducers::RoomsProjector),
        Box::new(reducers::RunsProjector),
        Box::new(reducers::IncidentsProjector),
        Box::new(reducers::ToolCallsProjector),
        Box::new(reducers::ArtifactsProjector),
        Box::new(reducers::ScorecardsProjector),
        Box::new(reducers::ApprovalsProjector),
        Box::new(reducers::EvidenceProjector),
        Box::new(reducers::SkillsProjector),
    ]
}

/// Shared projection engine. Clones share state.
#[derive(Clone)]
pub struct ProjectionEngine {
    state: Arc<RwLock<ProjectionState>>,
    projectors: Arc<Vec<Box<dyn Projector>>>,
    dlq: DeadLetterQueue,
}

impl fmt::Debug for ProjectionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionEngine")
            .field("projectors", &self.projectors.len())
            .finish_non_exhaustive()
    }
}

impl ProjectionEngine {
    /// Engine with the standard projector set.
    #[must_use]
    pub fn new(dlq: DeadLetterQueue) -> Self {
        Self::with_projectors(default_projectors(), dlq)
    }

    /// Engine with a custom projector set.
    #[must_use]
    pub fn with_projectors(projectors: Vec<Box<dyn Projector>>, dlq: DeadLetterQueue) -> Self {
        Self {
            state: Arc::new(RwLock::new(ProjectionState::new())),
            projectors: Arc::new(projectors),
            dlq,
        }
    }

    /// Apply one committed event through every projector.
    ///
    /// Runs strictly after a successful append. Each `(projector, event)`
    /// pair applies at most once; a failing projector is logged, parked in
    /// the dead-letter queue, and does not stop the others.
    ///
    /// # Errors
    ///
    /// The first [`ProjectionError`] encountered, after all projectors have
    /// run. The append stands regardless.
    pub fn apply(&self, event: &EventEnvelope) -> Result<(), ProjectionError> {
        let mut state = self.state.write().expect("projection lock poisoned");
        let mut first_error = None;

        for projector in self.projectors.iter() {
            let fence = (projector.name().to_string(), event.event_id.clone());
            if state.applied.contains(&fence) {
                continue;
            }
            match projector.apply(event, &mut state) {
                Ok(()) => {
                    state.applied.insert(fence);
                }
                Err(err) => {
                    tracing::error!(
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        projector = projector.name(),
                        error = %err,
                        "projector failed; event parked for re-projection"
                    );
                    self.dlq.push(DeadLetter {
                        event_id: event.event_id.clone(),
                        idempotency_key: event.idempotency_key.clone(),
                        projector: projector.name().to_string(),
                        error: err.to_string(),
                        at: event.recorded_at,
                    });
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// A point-in-time copy of the whole state.
    #[must_use]
    pub fn snapshot(&self) -> ProjectionState {
        self.state.read().expect("projection lock poisoned").clone()
    }

    /// Run a read against the live state without copying it.
    pub fn with_state<R>(&self, f: impl FnOnce(&ProjectionState) -> R) -> R {
        let state = self.state.read().expect("projection lock poisoned");
        f(&state)
    }

    /// The dead-letter queue failures park in.
    #[must_use]
    pub fn dlq(&self) -> &DeadLetterQueue {
        &self.dlq
    }
}

/// Rebuild a fresh state by replaying events in `(recorded_at, stream_seq)`
/// order. Failures are logged and skipped, matching the incremental path's
/// park-and-continue behavior.
#[must_use]
pub fn rebuild(events: &[EventEnvelope]) -> ProjectionState {
    let mut ordered: Vec<&EventEnvelope> = events.iter().collect();
    ordered.sort_by(|a, b| {
        a.recorded_at
            .cmp(&b.recorded_at)
            .then(a.stream.stream_seq.cmp(&b.stream.stream_seq))
    });

    let projectors = default_projectors();
    let mut state = ProjectionState::new();
    for event in ordered {
        for projector in &projectors {
            let fence = (projector.name().to_string(), event.event_id.clone());
            if state.applied.contains(&fence) {
                continue;
            }
            match projector.apply(event, &mut state) {
                Ok(()) => {
                    state.applied.insert(fence);
                }
                Err(err) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        projector = projector.name(),
                        error = %err,
                        "skipping event during rebuild"
                    );
                }
            }
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocp_core::{Actor, EventDraft};
    use ocp_store::EventStore;
    use serde_json::json;

    struct FailingProjector;

    impl Projector for FailingProjector {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn apply(
            &self,
            event: &EventEnvelope,
            _state: &mut ProjectionState,
        ) -> Result<(), ProjectionError> {
            Err(ProjectionError::MalformedData {
                event_id: event.event_id.clone(),
                field: "always".into(),
            })
        }
    }

    fn run_queued_event(store: &EventStore, run_id: &str) -> EventEnvelope {
        store
            .append(
                EventDraft::new("run.queued", "ws1", Actor::service("scheduler"))
                    .run(run_id)
                    .data(json!({})),
            )
            .unwrap()
    }

    #[test]
    fn apply_is_idempotent_per_event() {
        let store = EventStore::default();
        let engine = ProjectionEngine::new(DeadLetterQueue::new());
        let event = run_queued_event(&store, "run_1");
        engine.apply(&event).unwrap();
        engine.apply(&event).unwrap();
        let state = engine.snapshot();
        assert_eq!(state.runs.len(), 1);
    }

    #[test]
    fn failing_projector_parks_in_dlq_but_others_proceed() {
        let store = EventStore::default();
        let dlq = DeadLetterQueue::new();
        let mut projectors = default_projectors();
        projectors.push(Box::new(FailingProjector));
        let engine = ProjectionEngine::with_projectors(projectors, dlq.clone());

        let event = run_queued_event(&store, "run_1");
        let err = engine.apply(&event).unwrap_err();
        assert!(matches!(err, ProjectionError::MalformedData { .. }));

        // The healthy projector still materialized the run.
        assert_eq!(engine.snapshot().runs.len(), 1);
        let letters = dlq.drain();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].projector, "failing");
        assert_eq!(letters[0].event_id, event.event_id);
    }

    #[test]
    fn rebuild_matches_incremental_state() {
        let store = EventStore::default();
        let engine = ProjectionEngine::new(DeadLetterQueue::new());
        let events: Vec<EventEnvelope> = (0..5)
            .map(|i| run_queued_event(&store, &format!("run_{i}")))
            .collect();
        for e in &events {
            engine.apply(e).unwrap();
        }
        let rebuilt = rebuild(&events);
        assert_eq!(rebuilt.runs, engine.snapshot().runs);
    }

    #[test]
    fn snapshot_is_detached() {
        let store = EventStore::default();
        let engine = ProjectionEngine::new(DeadLetterQueue::new());
        let snap = engine.snapshot();
        engine.apply(&run_queued_event(&store, "run_1")).unwrap();
        assert!(snap.runs.is_empty());
        assert_eq!(engine.snapshot().runs.len(), 1);
    }
}
