// SPDX-License-Identifier: MIT OR Apache-2.0

//! Projection row types and the in-memory projection state.
//!
//! Every row carries `last_event_id` and `correlation_id` so rebuilds can
//! be checked and stale writes detected: an event older than the row's
//! last applied `(recorded_at, stream_seq)` is dropped by the reducers.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scorecard::{Metric, ScorecardDecision};

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Run lifecycle status. Transitions are forward-only:
/// queued → running → {succeeded, failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting to execute.
    Queued,
    /// Executing.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
}

impl RunStatus {
    /// Rank used to refuse backwards transitions.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Succeeded | Self::Failed => 2,
        }
    }
}

/// Tool call status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// In flight.
    Running,
    /// Completed.
    Succeeded,
    /// Failed.
    Failed,
}

/// Incident status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    /// Under investigation.
    Open,
    /// Resolved; requires RCA and at least one learning.
    Closed,
}

/// Approval status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting a decision.
    Pending,
    /// Parked pending more information.
    Held,
    /// Granted.
    Approved,
    /// Refused.
    Rejected,
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// Error recorded on a failed run; feeds the pipeline triage predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    /// Stable error code, e.g. `policy_denied`.
    pub code: String,
    /// Error family, e.g. `policy`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Sanitized message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A run row (`proj_runs`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRow {
    /// Run identifier.
    pub run_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Failure detail when `status == failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    /// Correlation of the last applied event.
    pub correlation_id: String,
    /// Last applied event.
    pub last_event_id: String,
    /// Stale-write fence: `(recorded_at, stream_seq)` of the last applied
    /// event.
    pub last_applied: (DateTime<Utc>, i64),
    /// Row creation instant.
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

/// A step row (`proj_steps`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRow {
    /// Step identifier.
    pub step_id: String,
    /// Owning run.
    pub run_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Step name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether the step completed.
    pub completed: bool,
    /// Last applied event.
    pub last_event_id: String,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

/// A room row (`proj_rooms`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRow {
    /// Room identifier.
    pub room_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Messages recorded in the room.
    pub message_count: u64,
    /// Last applied event.
    pub last_event_id: String,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

/// A thread row (`proj_threads`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRow {
    /// Thread identifier.
    pub thread_id: String,
    /// Owning room.
    pub room_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Messages recorded in the thread.
    pub message_count: u64,
    /// Last applied event.
    pub last_event_id: String,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

/// An incident row (`proj_incidents`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRow {
    /// Incident identifier.
    pub incident_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Status.
    pub status: IncidentStatus,
    /// Linked run, when the incident was opened against one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Correlation of the opening event.
    pub correlation_id: String,
    /// Last RCA update; close is refused while this is null.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rca_updated_at: Option<DateTime<Utc>>,
    /// Learnings logged; close is refused while this is zero.
    pub learning_count: u32,
    /// Opening instant.
    pub opened_at: DateTime<Utc>,
    /// Last applied event.
    pub last_event_id: String,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

impl IncidentRow {
    /// Whether `incident.closed` may be recorded: the RCA has been updated
    /// and at least one learning logged.
    #[must_use]
    pub fn can_close(&self) -> bool {
        self.rca_updated_at.is_some() && self.learning_count >= 1
    }
}

/// A scorecard row (`proj_scorecards`), normalized deterministically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorecardRow {
    /// Scorecard identifier.
    pub scorecard_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Scored run, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Metrics sorted by key.
    pub metrics: Vec<Metric>,
    /// `sha256:`-prefixed digest of the sorted metrics.
    pub metrics_hash: String,
    /// Weighted score clamped to [0, 1].
    pub score: f64,
    /// pass / warn / fail.
    pub decision: ScorecardDecision,
    /// Last applied event.
    pub last_event_id: String,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

/// A lesson row (`proj_lessons`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonRow {
    /// Lesson identifier.
    pub lesson_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Source incident, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    /// Lesson title.
    pub title: String,
    /// Last applied event.
    pub last_event_id: String,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

/// An artifact row (`proj_artifacts`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRow {
    /// Artifact identifier.
    pub artifact_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Producing run, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Object storage key.
    pub object_key: String,
    /// Media type, if declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Size in bytes, if declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Last applied event.
    pub last_event_id: String,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

/// A tool call row (`proj_tool_calls`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRow {
    /// Tool call identifier.
    pub tool_call_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Owning run, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Invoked tool.
    pub tool_name: String,
    /// Status.
    pub status: ToolCallStatus,
    /// Last applied event.
    pub last_event_id: String,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

/// An approval row (`proj_approvals`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRow {
    /// Approval identifier.
    pub approval_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Status.
    pub status: ApprovalStatus,
    /// Gated run, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Correlation of the last applied event.
    pub correlation_id: String,
    /// Last applied event.
    pub last_event_id: String,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

/// An evidence manifest row (`proj_evidence_manifests`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceManifestRow {
    /// Manifest identifier.
    pub manifest_id: String,
    /// Evidenced run.
    pub run_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Number of evidence entries.
    pub entry_count: u32,
    /// Last applied event.
    pub last_event_id: String,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

/// An incident learning row (`proj_incident_learning`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentLearningRow {
    /// Learning identifier.
    pub learning_id: String,
    /// Source incident.
    pub incident_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Learning summary.
    pub summary: String,
    /// Last applied event.
    pub last_event_id: String,
    /// Recording instant.
    pub recorded_at: DateTime<Utc>,
}

/// A skills-ledger row. The kernel records caller-supplied survival inputs;
/// it computes nothing itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRow {
    /// Skill identifier.
    pub skill_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Total invocations recorded.
    pub invocations: u64,
    /// Successful invocations recorded.
    pub successes: u64,
    /// Caller-supplied survival score, last write wins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub survival_score: Option<f64>,
    /// Last applied event.
    pub last_event_id: String,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ProjectionState
// ---------------------------------------------------------------------------

/// All projection tables, keyed by entity id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionState {
    /// `proj_runs`.
    pub runs: HashMap<String, RunRow>,
    /// `proj_steps`.
    pub steps: HashMap<String, StepRow>,
    /// `proj_rooms`.
    pub rooms: HashMap<String, RoomRow>,
    /// `proj_threads`.
    pub threads: HashMap<String, ThreadRow>,
    /// `proj_incidents`.
    pub incidents: HashMap<String, IncidentRow>,
    /// `proj_scorecards`.
    pub scorecards: HashMap<String, ScorecardRow>,
    /// `proj_lessons`.
    pub lessons: HashMap<String, LessonRow>,
    /// `proj_artifacts`.
    pub artifacts: HashMap<String, ArtifactRow>,
    /// `proj_tool_calls`.
    pub tool_calls: HashMap<String, ToolCallRow>,
    /// `proj_approvals`.
    pub approvals: HashMap<String, ApprovalRow>,
    /// `proj_evidence_manifests`.
    pub evidence_manifests: HashMap<String, EvidenceManifestRow>,
    /// `proj_incident_learning`.
    pub incident_learning: HashMap<String, IncidentLearningRow>,
    /// Skills ledger.
    pub skills: HashMap<String, SkillRow>,
    /// Applied `(projector, event_id)` pairs; the idempotence fence. A
    /// re-apply after a partial failure reruns only the projectors that
    /// did not complete.
    pub applied: HashSet<(String, String)>,
}

impl ProjectionState {
    /// Empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest open incident linked to a run by `run_id` or
    /// `correlation_id`.
    #[must_use]
    pub fn open_incident_for_run(&self, run: &RunRow) -> Option<&IncidentRow> {
        self.incidents
            .values()
            .filter(|inc| inc.workspace_id == run.workspace_id)
            .filter(|inc| inc.status == IncidentStatus::Open)
            .filter(|inc| {
                inc.run_id.as_deref() == Some(run.run_id.as_str())
                    || inc.correlation_id == run.correlation_id
            })
            .max_by_key(|inc| inc.opened_at)
    }
}
