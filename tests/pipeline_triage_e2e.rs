// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end pipeline classification driven through the event log and the
//! projector layer, including the watermark contract.

use ocp_core::{Actor, EventDraft, EventEnvelope};
use ocp_projection::{ProjectionEngine, pipeline_view};
use ocp_store::{DeadLetterQueue, EventStore};
use serde_json::json;

struct World {
    store: EventStore,
    engine: ProjectionEngine,
}

impl World {
    fn new() -> Self {
        Self {
            store: EventStore::default(),
            engine: ProjectionEngine::new(DeadLetterQueue::new()),
        }
    }

    fn record(&self, draft: EventDraft) -> EventEnvelope {
        let event = self.store.append(draft).unwrap();
        self.engine.apply(&event).unwrap();
        event
    }

    fn run_event(&self, event_type: &str, run_id: &str, data: serde_json::Value) -> EventEnvelope {
        self.record(
            EventDraft::new(event_type, "ws1", Actor::service("scheduler"))
                .run(run_id)
                .data(data),
        )
    }
}

#[test]
fn runs_classify_into_execute_review_and_demoted() {
    let w = World::new();

    // R1 queued → stage 3.
    w.run_event("run.queued", "r1", json!({}));
    // R2 succeeded → stage 4.
    w.run_event("run.queued", "r2", json!({}));
    w.run_event("run.succeeded", "r2", json!({}));
    // R3 failed with a policy code → stage 4 by triage.
    w.run_event("run.queued", "r3", json!({}));
    w.run_event(
        "run.failed",
        "r3",
        json!({"error": {"code": "policy_denied"}}),
    );
    // R4 failed with a transient code and no open incident → stage 6.
    w.run_event("run.queued", "r4", json!({}));
    let last = w.run_event(
        "run.failed",
        "r4",
        json!({"error": {"code": "transient_network"}}),
    );

    let view = w
        .engine
        .with_state(|s| pipeline_view(s, "ws1", None));

    let ids = |key: &str| -> Vec<String> {
        view.stages[key]
            .items
            .iter()
            .map(|i| i.entity_id.clone())
            .collect()
    };
    assert_eq!(ids("3_execute_workspace"), vec!["r1"]);
    let mut review = ids("4_review_evidence");
    review.sort();
    assert_eq!(review, vec!["r2", "r3"]);
    assert_eq!(ids("6_demoted"), vec!["r4"]);
    assert!(view.stages["1_inbox"].items.is_empty());
    assert!(view.stages["5_promoted"].items.is_empty());

    // Watermark is the most recently updated row's last event.
    assert_eq!(view.watermark_event_id.as_deref(), Some(last.event_id.as_str()));
}

#[test]
fn open_incident_triages_failure_into_review() {
    let w = World::new();
    w.run_event("run.queued", "r1", json!({}));
    w.run_event(
        "run.failed",
        "r1",
        json!({"error": {"code": "transient_network"}}),
    );
    // Linked by run_id.
    w.record(
        EventDraft::new("incident.opened", "ws1", Actor::service("ops"))
            .run("r1")
            .data(json!({"incident_id": "inc_1"})),
    );

    let view = w.engine.with_state(|s| pipeline_view(s, "ws1", None));
    assert_eq!(view.stages["4_review_evidence"].items.len(), 1);
    assert_eq!(
        view.stages["4_review_evidence"].items[0]
            .open_incident_id
            .as_deref(),
        Some("inc_1")
    );
    assert!(view.stages["6_demoted"].items.is_empty());
}

#[test]
fn closing_the_incident_demotes_the_failure_again() {
    let w = World::new();
    w.run_event("run.queued", "r1", json!({}));
    w.run_event(
        "run.failed",
        "r1",
        json!({"error": {"code": "transient_network"}}),
    );
    w.record(
        EventDraft::new("incident.opened", "ws1", Actor::service("ops"))
            .run("r1")
            .data(json!({"incident_id": "inc_1"})),
    );
    w.record(
        EventDraft::new("incident.rca.updated", "ws1", Actor::service("ops"))
            .data(json!({"incident_id": "inc_1"})),
    );
    w.record(
        EventDraft::new("incident.learning.logged", "ws1", Actor::service("ops"))
            .data(json!({"incident_id": "inc_1", "summary": "retry with backoff"})),
    );
    w.record(
        EventDraft::new("incident.closed", "ws1", Actor::service("ops"))
            .data(json!({"incident_id": "inc_1"})),
    );

    let view = w.engine.with_state(|s| pipeline_view(s, "ws1", None));
    assert!(view.stages["4_review_evidence"].items.is_empty());
    assert_eq!(view.stages["6_demoted"].items.len(), 1);
}

#[test]
fn pending_and_held_approvals_fill_stage_two() {
    let w = World::new();
    w.record(
        EventDraft::new("approval.requested", "ws1", Actor::service("ops"))
            .data(json!({"approval_id": "apr_pending"})),
    );
    w.record(
        EventDraft::new("approval.requested", "ws1", Actor::service("ops"))
            .data(json!({"approval_id": "apr_held"})),
    );
    w.record(
        EventDraft::new("approval.held", "ws1", Actor::service("ops"))
            .data(json!({"approval_id": "apr_held"})),
    );
    w.record(
        EventDraft::new("approval.requested", "ws1", Actor::service("ops"))
            .data(json!({"approval_id": "apr_done"})),
    );
    w.record(
        EventDraft::new("approval.approved", "ws1", Actor::service("ops"))
            .data(json!({"approval_id": "apr_done"})),
    );

    let view = w.engine.with_state(|s| pipeline_view(s, "ws1", None));
    let mut ids: Vec<String> = view.stages["2_pending_approval"]
        .items
        .iter()
        .map(|i| i.entity_id.clone())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["apr_held", "apr_pending"]);
}
