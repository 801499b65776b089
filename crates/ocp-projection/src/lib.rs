// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Read-model projections.
//!
//! Each projector is a pure, idempotent reducer applied once per appended
//! event, in the same process as the appender. Projections are
//! materializations only: every row is rebuildable by replaying the log in
//! `(recorded_at, stream_seq)` order, and a projector failure never rolls
//! an append back; it parks in the dead-letter queue instead.

mod engine;
mod pipeline;
mod reducers;
mod scorecard;
mod state;

pub use engine::{ProjectionEngine, ProjectionError, Projector, default_projectors, rebuild};
pub use pipeline::{
    DEFAULT_PIPELINE_LIMIT, MAX_PIPELINE_LIMIT, PipelineItem, PipelineItemKind, PipelineStage,
    PipelineView, pipeline_view, triages_to_review,
};
pub use scorecard::{Metric, NormalizedScorecard, ScorecardDecision, normalize_scorecard};
pub use state::{
    ApprovalRow, ApprovalStatus, ArtifactRow, EvidenceManifestRow, IncidentLearningRow,
    IncidentRow, IncidentStatus, LessonRow, ProjectionState, RoomRow, RunError, RunRow, RunStatus,
    ScorecardRow, SkillRow, StepRow, ThreadRow, ToolCallRow, ToolCallStatus,
};
