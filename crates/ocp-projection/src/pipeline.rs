// SPDX-License-Identifier: MIT OR Apache-2.0

//! The six-stage pipeline projection.
//!
//! A single read classifies a workspace's work into six buckets with a
//! uniform limit, a per-bucket truncation probe (fetch `limit + 1`, trim),
//! and a coherent watermark: the `last_event_id` of the most recently
//! updated item across the populated stages, ties broken by smallest
//! entity id.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{ApprovalStatus, ProjectionState, RunRow, RunStatus};

/// Default bucket limit.
pub const DEFAULT_PIPELINE_LIMIT: usize = 200;
/// Maximum bucket limit.
pub const MAX_PIPELINE_LIMIT: usize = 500;

/// Error codes that triage a failed run into review rather than demotion.
const TRIAGE_ERROR_CODES: [&str; 4] = [
    "policy_denied",
    "approval_required",
    "permission_denied",
    "external_write_kill_switch",
];

/// Stage keys, in order.
const STAGE_KEYS: [&str; 6] = [
    "1_inbox",
    "2_pending_approval",
    "3_execute_workspace",
    "4_review_evidence",
    "5_promoted",
    "6_demoted",
];

/// Kind of entity surfaced in a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineItemKind {
    /// A run from `proj_runs`.
    Run,
    /// An approval from `proj_approvals`.
    Approval,
}

/// One classified work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineItem {
    /// Run or approval id.
    pub entity_id: String,
    /// Entity kind.
    pub kind: PipelineItemKind,
    /// Status wire tag.
    pub status: String,
    /// Latest open incident linked by run or correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_incident_id: Option<String>,
    /// Error code of a failed run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Last event applied to the row.
    pub last_event_id: String,
    /// Row update instant.
    pub updated_at: DateTime<Utc>,
}

/// One bucket of the view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PipelineStage {
    /// Classified items, most recently updated first.
    pub items: Vec<PipelineItem>,
    /// Whether more than `limit` items matched.
    pub truncated: bool,
}

/// The whole view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineView {
    /// Buckets keyed `1_inbox` … `6_demoted`.
    pub stages: BTreeMap<String, PipelineStage>,
    /// Watermark over stages 2, 3, 4, 6.
    pub watermark_event_id: Option<String>,
}

/// Whether a failed run triages into review: an open incident is linked,
/// or the error code or kind marks a policy-shaped failure.
#[must_use]
pub fn triages_to_review(run: &RunRow, has_open_incident: bool) -> bool {
    if has_open_incident {
        return true;
    }
    let Some(error) = &run.error else {
        return false;
    };
    TRIAGE_ERROR_CODES.contains(&error.code.as_str()) || error.kind.as_deref() == Some("policy")
}

fn run_item(state: &ProjectionState, run: &RunRow) -> PipelineItem {
    let open_incident_id = state
        .open_incident_for_run(run)
        .map(|inc| inc.incident_id.clone());
    PipelineItem {
        entity_id: run.run_id.clone(),
        kind: PipelineItemKind::Run,
        status: status_tag(run.status),
        open_incident_id,
        error_code: run.error.as_ref().map(|e| e.code.clone()),
        last_event_id: run.last_event_id.clone(),
        updated_at: run.updated_at,
    }
}

fn status_tag(status: RunStatus) -> String {
    match status {
        RunStatus::Queued => "queued",
        RunStatus::Running => "running",
        RunStatus::Succeeded => "succeeded",
        RunStatus::Failed => "failed",
    }
    .to_string()
}

fn approval_tag(status: ApprovalStatus) -> String {
    match status {
        ApprovalStatus::Pending => "pending",
        ApprovalStatus::Held => "held",
        ApprovalStatus::Approved => "approved",
        ApprovalStatus::Rejected => "rejected",
    }
    .to_string()
}

/// Sort most recently updated first; equal instants order by entity id so
/// the view is deterministic.
fn sort_items(items: &mut [PipelineItem]) {
    items.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
}

fn into_stage(mut items: Vec<PipelineItem>, limit: usize) -> PipelineStage {
    sort_items(&mut items);
    let truncated = items.len() > limit;
    items.truncate(limit);
    PipelineStage { items, truncated }
}

/// Classify a workspace's work into the six stages.
#[must_use]
pub fn pipeline_view(
    state: &ProjectionState,
    workspace_id: &str,
    limit: Option<usize>,
) -> PipelineView {
    let limit = limit
        .unwrap_or(DEFAULT_PIPELINE_LIMIT)
        .clamp(1, MAX_PIPELINE_LIMIT);

    let pending_approval: Vec<PipelineItem> = state
        .approvals
        .values()
        .filter(|a| a.workspace_id == workspace_id)
        .filter(|a| matches!(a.status, ApprovalStatus::Pending | ApprovalStatus::Held))
        .map(|a| PipelineItem {
            entity_id: a.approval_id.clone(),
            kind: PipelineItemKind::Approval,
            status: approval_tag(a.status),
            open_incident_id: None,
            error_code: None,
            last_event_id: a.last_event_id.clone(),
            updated_at: a.updated_at,
        })
        .collect();

    let mut executing = Vec::new();
    let mut review = Vec::new();
    let mut demoted = Vec::new();
    for run in state
        .runs
        .values()
        .filter(|r| r.workspace_id == workspace_id)
    {
        let item = run_item(state, run);
        match run.status {
            RunStatus::Queued | RunStatus::Running => executing.push(item),
            RunStatus::Succeeded => review.push(item),
            RunStatus::Failed => {
                if triages_to_review(run, item.open_incident_id.is_some()) {
                    review.push(item);
                } else {
                    demoted.push(item);
                }
            }
        }
    }

    // The watermark is chosen over everything that matched, not just the
    // trimmed page.
    let watermark_event_id = pending_approval
        .iter()
        .chain(executing.iter())
        .chain(review.iter())
        .chain(demoted.iter())
        .max_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| b.entity_id.cmp(&a.entity_id))
        })
        .map(|item| item.last_event_id.clone());

    let mut stages = BTreeMap::new();
    stages.insert(STAGE_KEYS[0].to_string(), PipelineStage::default());
    stages.insert(STAGE_KEYS[1].to_string(), into_stage(pending_approval, limit));
    stages.insert(STAGE_KEYS[2].to_string(), into_stage(executing, limit));
    stages.insert(STAGE_KEYS[3].to_string(), into_stage(review, limit));
    stages.insert(STAGE_KEYS[4].to_string(), PipelineStage::default());
    stages.insert(STAGE_KEYS[5].to_string(), into_stage(demoted, limit));

    PipelineView {
        stages,
        watermark_event_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{IncidentRow, IncidentStatus, RunError};
    use chrono::Duration;

    fn run(id: &str, status: RunStatus, updated_at: DateTime<Utc>) -> RunRow {
        RunRow {
            run_id: id.to_string(),
            workspace_id: "ws1".into(),
            status,
            error: None,
            correlation_id: format!("cor_{id}"),
            last_event_id: format!("evt_{id}"),
            last_applied: (updated_at, 1),
            created_at: updated_at,
            updated_at,
        }
    }

    fn failed_run(id: &str, code: &str, kind: Option<&str>, at: DateTime<Utc>) -> RunRow {
        let mut r = run(id, RunStatus::Failed, at);
        r.error = Some(RunError {
            code: code.into(),
            kind: kind.map(str::to_string),
            message: None,
        });
        r
    }

    fn state_with_runs(runs: Vec<RunRow>) -> ProjectionState {
        let mut state = ProjectionState::new();
        for r in runs {
            state.runs.insert(r.run_id.clone(), r);
        }
        state
    }

    #[test]
    fn triage_predicate_on_error_codes_and_kind() {
        let now = Utc::now();
        assert!(triages_to_review(
            &failed_run("r1", "policy_denied", None, now),
            false
        ));
        assert!(triages_to_review(
            &failed_run("r2", "external_write_kill_switch", None, now),
            false
        ));
        assert!(triages_to_review(
            &failed_run("r3", "anything", Some("policy"), now),
            false
        ));
        assert!(!triages_to_review(
            &failed_run("r4", "transient_network", None, now),
            false
        ));
        assert!(triages_to_review(
            &failed_run("r5", "transient_network", None, now),
            true
        ));
    }

    #[test]
    fn six_buckets_classified() {
        let t0 = Utc::now();
        let state = state_with_runs(vec![
            run("r_queued", RunStatus::Queued, t0),
            run("r_done", RunStatus::Succeeded, t0 + Duration::seconds(1)),
            failed_run("r_policy", "policy_denied", None, t0 + Duration::seconds(2)),
            failed_run(
                "r_flaky",
                "transient_network",
                None,
                t0 + Duration::seconds(3),
            ),
        ]);
        let view = pipeline_view(&state, "ws1", None);

        assert!(view.stages["1_inbox"].items.is_empty());
        assert!(view.stages["5_promoted"].items.is_empty());
        let ids = |key: &str| -> Vec<&str> {
            view.stages[key]
                .items
                .iter()
                .map(|i| i.entity_id.as_str())
                .collect()
        };
        assert_eq!(ids("3_execute_workspace"), vec!["r_queued"]);
        assert_eq!(ids("4_review_evidence"), vec!["r_policy", "r_done"]);
        assert_eq!(ids("6_demoted"), vec!["r_flaky"]);
        // Most recently updated item overall is r_flaky.
        assert_eq!(view.watermark_event_id.as_deref(), Some("evt_r_flaky"));
    }

    #[test]
    fn open_incident_pulls_failed_run_into_review() {
        let now = Utc::now();
        let mut state = state_with_runs(vec![failed_run("r1", "transient_network", None, now)]);
        state.incidents.insert(
            "inc_1".into(),
            IncidentRow {
                incident_id: "inc_1".into(),
                workspace_id: "ws1".into(),
                status: IncidentStatus::Open,
                run_id: Some("r1".into()),
                correlation_id: "cor_other".into(),
                rca_updated_at: None,
                learning_count: 0,
                opened_at: now,
                last_event_id: "evt_inc".into(),
                updated_at: now,
            },
        );
        let view = pipeline_view(&state, "ws1", None);
        let review = &view.stages["4_review_evidence"];
        assert_eq!(review.items.len(), 1);
        assert_eq!(review.items[0].open_incident_id.as_deref(), Some("inc_1"));
        assert!(view.stages["6_demoted"].items.is_empty());
    }

    #[test]
    fn truncation_probe_fetches_one_extra() {
        let t0 = Utc::now();
        let runs: Vec<RunRow> = (0..5)
            .map(|i| run(&format!("r{i}"), RunStatus::Queued, t0 + Duration::seconds(i)))
            .collect();
        let state = state_with_runs(runs);
        let view = pipeline_view(&state, "ws1", Some(3));
        let stage = &view.stages["3_execute_workspace"];
        assert_eq!(stage.items.len(), 3);
        assert!(stage.truncated);
        // Most recent first.
        assert_eq!(stage.items[0].entity_id, "r4");
    }

    #[test]
    fn limit_is_clamped() {
        let state = state_with_runs(vec![run("r1", RunStatus::Queued, Utc::now())]);
        let view = pipeline_view(&state, "ws1", Some(9999));
        assert!(!view.stages["3_execute_workspace"].truncated);
        let view = pipeline_view(&state, "ws1", Some(0));
        assert_eq!(view.stages["3_execute_workspace"].items.len(), 1);
    }

    #[test]
    fn watermark_tie_breaks_on_smallest_entity_id() {
        let t0 = Utc::now();
        let state = state_with_runs(vec![
            run("r_b", RunStatus::Queued, t0),
            run("r_a", RunStatus::Queued, t0),
        ]);
        let view = pipeline_view(&state, "ws1", None);
        assert_eq!(view.watermark_event_id.as_deref(), Some("evt_r_a"));
    }

    #[test]
    fn foreign_workspace_rows_are_excluded() {
        let mut state = state_with_runs(vec![run("r1", RunStatus::Queued, Utc::now())]);
        let mut foreign = run("r_foreign", RunStatus::Queued, Utc::now());
        foreign.workspace_id = "ws2".into();
        state.runs.insert(foreign.run_id.clone(), foreign);
        let view = pipeline_view(&state, "ws1", None);
        assert_eq!(view.stages["3_execute_workspace"].items.len(), 1);
        assert_eq!(view.stages["3_execute_workspace"].items[0].entity_id, "r1");
    }

    #[test]
    fn empty_workspace_has_empty_view() {
        let state = ProjectionState::new();
        let view = pipeline_view(&state, "ws1", None);
        assert!(view.watermark_event_id.is_none());
        assert!(view.stages.values().all(|s| s.items.is_empty() && !s.truncated));
        assert_eq!(view.stages.len(), 6);
    }
}
