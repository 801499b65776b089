// SPDX-License-Identifier: MIT OR Apache-2.0

//! The standard reducers.
//!
//! Reducers are upsert-lenient: a terminal event for an entity the state
//! has not seen creates the row, so rebuilds from a partial slice still
//! converge. Run status transitions are the exception: they are
//! forward-only and fenced against stale writes by `(recorded_at,
//! stream_seq)`.

use ocp_core::{EventEnvelope, event_types};
use serde_json::Value;

use crate::engine::{ProjectionError, Projector};
use crate::scorecard::{Metric, normalize_scorecard};
use crate::state::{
    ApprovalRow, ApprovalStatus, ArtifactRow, EvidenceManifestRow, IncidentLearningRow,
    IncidentRow, IncidentStatus, LessonRow, ProjectionState, RoomRow, RunError, RunRow, RunStatus,
    ScorecardRow, SkillRow, StepRow, ThreadRow, ToolCallRow, ToolCallStatus,
};

// ---------------------------------------------------------------------------
// Extraction helpers
// ---------------------------------------------------------------------------

fn data_str(event: &EventEnvelope, field: &str) -> Result<String, ProjectionError> {
    event
        .data
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProjectionError::MalformedData {
            event_id: event.event_id.clone(),
            field: field.to_string(),
        })
}

fn data_str_opt(event: &EventEnvelope, field: &str) -> Option<String> {
    event
        .data
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn stamp(event: &EventEnvelope) -> (chrono::DateTime<chrono::Utc>, i64) {
    (event.recorded_at, event.stream.stream_seq)
}

// ---------------------------------------------------------------------------
// Runs and steps
// ---------------------------------------------------------------------------

/// Projects `run.*` and `run.step.*` into `proj_runs` / `proj_steps`.
pub struct RunsProjector;

impl RunsProjector {
    fn upsert_run(
        event: &EventEnvelope,
        state: &mut ProjectionState,
        status: RunStatus,
        error: Option<RunError>,
    ) -> Result<(), ProjectionError> {
        let run_id = event
            .run_id
            .clone()
            .ok_or_else(|| ProjectionError::MalformedData {
                event_id: event.event_id.clone(),
                field: "run_id".to_string(),
            })?;

        match state.runs.get_mut(&run_id) {
            Some(row) => {
                // Stale or regressing writes are dropped, not errors.
                if stamp(event) <= row.last_applied || status.rank() < row.status.rank() {
                    tracing::debug!(
                        run_id,
                        event_id = %event.event_id,
                        "dropping stale run event"
                    );
                    return Ok(());
                }
                row.status = status;
                row.error = error;
                row.correlation_id = event.correlation_id.clone();
                row.last_event_id = event.event_id.clone();
                row.last_applied = stamp(event);
                row.updated_at = event.recorded_at;
            }
            None => {
                state.runs.insert(
                    run_id.clone(),
                    RunRow {
                        run_id,
                        workspace_id: event.workspace_id.clone(),
                        status,
                        error,
                        correlation_id: event.correlation_id.clone(),
                        last_event_id: event.event_id.clone(),
                        last_applied: stamp(event),
                        created_at: event.recorded_at,
                        updated_at: event.recorded_at,
                    },
                );
            }
        }
        Ok(())
    }

    fn upsert_step(
        event: &EventEnvelope,
        state: &mut ProjectionState,
        completed: bool,
    ) -> Result<(), ProjectionError> {
        let step_id = event
            .step_id
            .clone()
            .ok_or_else(|| ProjectionError::MalformedData {
                event_id: event.event_id.clone(),
                field: "step_id".to_string(),
            })?;
        let run_id = event
            .run_id
            .clone()
            .ok_or_else(|| ProjectionError::MalformedData {
                event_id: event.event_id.clone(),
                field: "run_id".to_string(),
            })?;

        let row = state.steps.entry(step_id.clone()).or_insert_with(|| StepRow {
            step_id,
            run_id,
            workspace_id: event.workspace_id.clone(),
            name: data_str_opt(event, "name"),
            completed: false,
            last_event_id: event.event_id.clone(),
            updated_at: event.recorded_at,
        });
        row.completed = row.completed || completed;
        row.last_event_id = event.event_id.clone();
        row.updated_at = event.recorded_at;
        Ok(())
    }
}

impl Projector for RunsProjector {
    fn name(&self) -> &'static str {
        "runs"
    }

    fn apply(
        &self,
        event: &EventEnvelope,
        state: &mut ProjectionState,
    ) -> Result<(), ProjectionError> {
        match event.event_type.as_str() {
            event_types::RUN_QUEUED => Self::upsert_run(event, state, RunStatus::Queued, None),
            event_types::RUN_STARTED => Self::upsert_run(event, state, RunStatus::Running, None),
            event_types::RUN_SUCCEEDED => {
                Self::upsert_run(event, state, RunStatus::Succeeded, None)
            }
            event_types::RUN_FAILED => {
                let error = event.data.get("error").map(|e| RunError {
                    code: e
                        .get("code")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                    kind: e.get("kind").and_then(Value::as_str).map(str::to_string),
                    message: e
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
                Self::upsert_run(event, state, RunStatus::Failed, error)
            }
            event_types::STEP_STARTED => Self::upsert_step(event, state, false),
            event_types::STEP_COMPLETED => Self::upsert_step(event, state, true),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Incidents
// ---------------------------------------------------------------------------

/// Projects `incident.*` into `proj_incidents` / `proj_incident_learning`.
///
/// `learning_count` and `rca_updated_at` move only on their dedicated
/// events; the close precondition is enforced before append, upstream.
pub struct IncidentsProjector;

impl Projector for IncidentsProjector {
    fn name(&self) -> &'static str {
        "incidents"
    }

    fn apply(
        &self,
        event: &EventEnvelope,
        state: &mut ProjectionState,
    ) -> Result<(), ProjectionError> {
        match event.event_type.as_str() {
            event_types::INCIDENT_OPENED => {
                let incident_id = data_str(event, "incident_id")?;
                state.incidents.insert(
                    incident_id.clone(),
                    IncidentRow {
                        incident_id,
                        workspace_id: event.workspace_id.clone(),
                        status: IncidentStatus::Open,
                        run_id: event.run_id.clone().or_else(|| data_str_opt(event, "run_id")),
                        correlation_id: event.correlation_id.clone(),
                        rca_updated_at: None,
                        learning_count: 0,
                        opened_at: event.recorded_at,
                        last_event_id: event.event_id.clone(),
                        updated_at: event.recorded_at,
                    },
                );
                Ok(())
            }
            event_types::INCIDENT_RCA_UPDATED => {
                let incident_id = data_str(event, "incident_id")?;
                let row = state.incidents.get_mut(&incident_id).ok_or_else(|| {
                    ProjectionError::UnknownEntity {
                        event_id: event.event_id.clone(),
                        entity: "incident",
                        entity_id: incident_id.clone(),
                    }
                })?;
                row.rca_updated_at = Some(event.recorded_at);
                row.last_event_id = event.event_id.clone();
                row.updated_at = event.recorded_at;
                Ok(())
            }
            event_types::INCIDENT_LEARNING_LOGGED => {
                let incident_id = data_str(event, "incident_id")?;
                let row = state.incidents.get_mut(&incident_id).ok_or_else(|| {
                    ProjectionError::UnknownEntity {
                        event_id: event.event_id.clone(),
                        entity: "incident",
                        entity_id: incident_id.clone(),
                    }
                })?;
                row.learning_count += 1;
                row.last_event_id = event.event_id.clone();
                row.updated_at = event.recorded_at;

                let learning_id =
                    data_str_opt(event, "learning_id").unwrap_or_else(|| event.event_id.clone());
                state.incident_learning.insert(
                    learning_id.clone(),
                    IncidentLearningRow {
                        learning_id,
                        incident_id,
                        workspace_id: event.workspace_id.clone(),
                        summary: data_str_opt(event, "summary").unwrap_or_default(),
                        last_event_id: event.event_id.clone(),
                        recorded_at: event.recorded_at,
                    },
                );
                Ok(())
            }
            event_types::INCIDENT_CLOSED => {
                let incident_id = data_str(event, "incident_id")?;
                let row = state.incidents.get_mut(&incident_id).ok_or_else(|| {
                    ProjectionError::UnknownEntity {
                        event_id: event.event_id.clone(),
                        entity: "incident",
                        entity_id: incident_id.clone(),
                    }
                })?;
                row.status = IncidentStatus::Closed;
                row.last_event_id = event.event_id.clone();
                row.updated_at = event.recorded_at;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// Projects `tool.call.*` into `proj_tool_calls`.
pub struct ToolCallsProjector;

impl ToolCallsProjector {
    fn upsert(
        event: &EventEnvelope,
        state: &mut ProjectionState,
        status: ToolCallStatus,
    ) -> Result<(), ProjectionError> {
        let tool_call_id = data_str(event, "tool_call_id")?;
        let row = state
            .tool_calls
            .entry(tool_call_id.clone())
            .or_insert_with(|| ToolCallRow {
                tool_call_id,
                workspace_id: event.workspace_id.clone(),
                run_id: event.run_id.clone(),
                tool_name: data_str_opt(event, "tool_name").unwrap_or_default(),
                status,
                last_event_id: event.event_id.clone(),
                updated_at: event.recorded_at,
            });
        row.status = status;
        if let Some(name) = data_str_opt(event, "tool_name") {
            row.tool_name = name;
        }
        row.last_event_id = event.event_id.clone();
        row.updated_at = event.recorded_at;
        Ok(())
    }
}

impl Projector for ToolCallsProjector {
    fn name(&self) -> &'static str {
        "tool_calls"
    }

    fn apply(
        &self,
        event: &EventEnvelope,
        state: &mut ProjectionState,
    ) -> Result<(), ProjectionError> {
        match event.event_type.as_str() {
            event_types::TOOL_CALL_STARTED => Self::upsert(event, state, ToolCallStatus::Running),
            event_types::TOOL_CALL_SUCCEEDED => {
                Self::upsert(event, state, ToolCallStatus::Succeeded)
            }
            event_types::TOOL_CALL_FAILED => Self::upsert(event, state, ToolCallStatus::Failed),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// Projects `artifact.recorded` into `proj_artifacts`.
pub struct ArtifactsProjector;

impl Projector for ArtifactsProjector {
    fn name(&self) -> &'static str {
        "artifacts"
    }

    fn apply(
        &self,
        event: &EventEnvelope,
        state: &mut ProjectionState,
    ) -> Result<(), ProjectionError> {
        if event.event_type != event_types::ARTIFACT_RECORDED {
            return Ok(());
        }
        let artifact_id = data_str(event, "artifact_id")?;
        let object_key = data_str(event, "object_key")?;
        state.artifacts.insert(
            artifact_id.clone(),
            ArtifactRow {
                artifact_id,
                workspace_id: event.workspace_id.clone(),
                run_id: event.run_id.clone(),
                object_key,
                media_type: data_str_opt(event, "media_type"),
                size_bytes: event.data.get("size_bytes").and_then(Value::as_u64),
                last_event_id: event.event_id.clone(),
                updated_at: event.recorded_at,
            },
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scorecards and lessons
// ---------------------------------------------------------------------------

/// Projects `scorecard.recorded` / `lesson.recorded` into
/// `proj_scorecards` / `proj_lessons`, normalizing metrics.
pub struct ScorecardsProjector;

impl Projector for ScorecardsProjector {
    fn name(&self) -> &'static str {
        "scorecards"
    }

    fn apply(
        &self,
        event: &EventEnvelope,
        state: &mut ProjectionState,
    ) -> Result<(), ProjectionError> {
        match event.event_type.as_str() {
            event_types::SCORECARD_RECORDED => {
                let scorecard_id = data_str(event, "scorecard_id")?;
                let metrics: Vec<Metric> = event
                    .data
                    .get("metrics")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .ok_or_else(|| ProjectionError::MalformedData {
                        event_id: event.event_id.clone(),
                        field: "metrics".to_string(),
                    })?;
                let normalized = normalize_scorecard(metrics);
                state.scorecards.insert(
                    scorecard_id.clone(),
                    ScorecardRow {
                        scorecard_id,
                        workspace_id: event.workspace_id.clone(),
                        run_id: event.run_id.clone().or_else(|| data_str_opt(event, "run_id")),
                        metrics: normalized.metrics,
                        metrics_hash: normalized.metrics_hash,
                        score: normalized.score,
                        decision: normalized.decision,
                        last_event_id: event.event_id.clone(),
                        updated_at: event.recorded_at,
                    },
                );
                Ok(())
            }
            event_types::LESSON_RECORDED => {
                let lesson_id = data_str(event, "lesson_id")?;
                state.lessons.insert(
                    lesson_id.clone(),
                    LessonRow {
                        lesson_id,
                        workspace_id: event.workspace_id.clone(),
                        incident_id: data_str_opt(event, "incident_id"),
                        title: data_str_opt(event, "title").unwrap_or_default(),
                        last_event_id: event.event_id.clone(),
                        updated_at: event.recorded_at,
                    },
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Approvals
// ---------------------------------------------------------------------------

/// Projects `approval.*` into `proj_approvals`.
pub struct ApprovalsProjector;

impl ApprovalsProjector {
    fn upsert(
        event: &EventEnvelope,
        state: &mut ProjectionState,
        status: ApprovalStatus,
    ) -> Result<(), ProjectionError> {
        let approval_id = data_str(event, "approval_id")?;
        let row = state
            .approvals
            .entry(approval_id.clone())
            .or_insert_with(|| ApprovalRow {
                approval_id,
                workspace_id: event.workspace_id.clone(),
                status,
                run_id: event.run_id.clone().or_else(|| data_str_opt(event, "run_id")),
                correlation_id: event.correlation_id.clone(),
                last_event_id: event.event_id.clone(),
                updated_at: event.recorded_at,
            });
        row.status = status;
        row.correlation_id = event.correlation_id.clone();
        row.last_event_id = event.event_id.clone();
        row.updated_at = event.recorded_at;
        Ok(())
    }
}

impl Projector for ApprovalsProjector {
    fn name(&self) -> &'static str {
        "approvals"
    }

    fn apply(
        &self,
        event: &EventEnvelope,
        state: &mut ProjectionState,
    ) -> Result<(), ProjectionError> {
        match event.event_type.as_str() {
            event_types::APPROVAL_REQUESTED => {
                Self::upsert(event, state, ApprovalStatus::Pending)
            }
            event_types::APPROVAL_HELD => Self::upsert(event, state, ApprovalStatus::Held),
            event_types::APPROVAL_APPROVED => Self::upsert(event, state, ApprovalStatus::Approved),
            event_types::APPROVAL_REJECTED => Self::upsert(event, state, ApprovalStatus::Rejected),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Rooms and threads
// ---------------------------------------------------------------------------

/// Projects room/thread creation and message activity into `proj_rooms` /
/// `proj_threads`.
pub struct RoomsProjector;

impl RoomsProjector {
    fn touch_room(event: &EventEnvelope, state: &mut ProjectionState, room_id: &str, bump: bool) {
        let row = state
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomRow {
                room_id: room_id.to_string(),
                workspace_id: event.workspace_id.clone(),
                message_count: 0,
                last_event_id: event.event_id.clone(),
                updated_at: event.recorded_at,
            });
        if bump {
            row.message_count += 1;
        }
        row.last_event_id = event.event_id.clone();
        row.updated_at = event.recorded_at;
    }

    fn touch_thread(
        event: &EventEnvelope,
        state: &mut ProjectionState,
        thread_id: &str,
        bump: bool,
    ) {
        let row = state
            .threads
            .entry(thread_id.to_string())
            .or_insert_with(|| ThreadRow {
                thread_id: thread_id.to_string(),
                room_id: event.room_id.clone().unwrap_or_default(),
                workspace_id: event.workspace_id.clone(),
                message_count: 0,
                last_event_id: event.event_id.clone(),
                updated_at: event.recorded_at,
            });
        if bump {
            row.message_count += 1;
        }
        row.last_event_id = event.event_id.clone();
        row.updated_at = event.recorded_at;
    }
}

impl Projector for RoomsProjector {
    fn name(&self) -> &'static str {
        "rooms"
    }

    fn apply(
        &self,
        event: &EventEnvelope,
        state: &mut ProjectionState,
    ) -> Result<(), ProjectionError> {
        match event.event_type.as_str() {
            event_types::ROOM_CREATED => {
                let room_id = event
                    .room_id
                    .clone()
                    .or_else(|| data_str_opt(event, "room_id"))
                    .ok_or_else(|| ProjectionError::MalformedData {
                        event_id: event.event_id.clone(),
                        field: "room_id".to_string(),
                    })?;
                Self::touch_room(event, state, &room_id, false);
                Ok(())
            }
            event_types::THREAD_CREATED => {
                let thread_id = event
                    .thread_id
                    .clone()
                    .or_else(|| data_str_opt(event, "thread_id"))
                    .ok_or_else(|| ProjectionError::MalformedData {
                        event_id: event.event_id.clone(),
                        field: "thread_id".to_string(),
                    })?;
                Self::touch_thread(event, state, &thread_id, false);
                Ok(())
            }
            event_types::MESSAGE_CREATED => {
                if let Some(room_id) = event.room_id.clone() {
                    Self::touch_room(event, state, &room_id, true);
                }
                if let Some(thread_id) = event.thread_id.clone() {
                    Self::touch_thread(event, state, &thread_id, true);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Evidence manifests
// ---------------------------------------------------------------------------

/// Projects `evidence.manifest.recorded` into `proj_evidence_manifests`.
pub struct EvidenceProjector;

impl Projector for EvidenceProjector {
    fn name(&self) -> &'static str {
        "evidence_manifests"
    }

    fn apply(
        &self,
        event: &EventEnvelope,
        state: &mut ProjectionState,
    ) -> Result<(), ProjectionError> {
        if event.event_type != event_types::EVIDENCE_MANIFEST_RECORDED {
            return Ok(());
        }
        let run_id = event
            .run_id
            .clone()
            .or_else(|| data_str_opt(event, "run_id"))
            .ok_or_else(|| ProjectionError::MalformedData {
                event_id: event.event_id.clone(),
                field: "run_id".to_string(),
            })?;
        let manifest_id =
            data_str_opt(event, "manifest_id").unwrap_or_else(|| event.event_id.clone());
        let entry_count = event
            .data
            .get("entries")
            .and_then(Value::as_array)
            .map_or(0, |a| a.len() as u32);
        state.evidence_manifests.insert(
            manifest_id.clone(),
            EvidenceManifestRow {
                manifest_id,
                run_id,
                workspace_id: event.workspace_id.clone(),
                entry_count,
                last_event_id: event.event_id.clone(),
                updated_at: event.recorded_at,
            },
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Skills ledger
// ---------------------------------------------------------------------------

/// Projects `skill.invoked` into the skills ledger. Survival scores are
/// caller-supplied; the kernel records, it does not compute.
pub struct SkillsProjector;

impl Projector for SkillsProjector {
    fn name(&self) -> &'static str {
        "skills_ledger"
    }

    fn apply(
        &self,
        event: &EventEnvelope,
        state: &mut ProjectionState,
    ) -> Result<(), ProjectionError> {
        if event.event_type != event_types::SKILL_INVOKED {
            return Ok(());
        }
        let skill_id = data_str(event, "skill_id")?;
        let success = event
            .data
            .get("success")
            .and_then(Value::as_bool)
            .ok_or_else(|| ProjectionError::MalformedData {
                event_id: event.event_id.clone(),
                field: "success".to_string(),
            })?;
        let row = state.skills.entry(skill_id.clone()).or_insert_with(|| SkillRow {
            skill_id,
            workspace_id: event.workspace_id.clone(),
            invocations: 0,
            successes: 0,
            survival_score: None,
            last_event_id: event.event_id.clone(),
            updated_at: event.recorded_at,
        });
        row.invocations += 1;
        if success {
            row.successes += 1;
        }
        if let Some(score) = event.data.get("survival_score").and_then(Value::as_f64) {
            row.survival_score = Some(score);
        }
        row.last_event_id = event.event_id.clone();
        row.updated_at = event.recorded_at;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
