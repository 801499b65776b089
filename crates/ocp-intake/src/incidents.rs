// SPDX-License-Identifier: MIT OR Apache-2.0

//! Incident close: the one work-item transition with a projection-backed
//! precondition. Closing requires an updated RCA and at least one logged
//! learning; the check runs before the append, so a refused close leaves
//! no event behind.

use ocp_core::{Actor, EventDraft, event_types};
use ocp_error::{CoreError, ReasonCode};
use ocp_projection::{IncidentStatus, ProjectionEngine};
use ocp_store::EventStore;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Result of a close request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseOutcome {
    /// The incident.
    pub incident_id: String,
    /// Whether the incident was already closed (idempotent no-op).
    pub already_closed: bool,
    /// The closing event, absent on a no-op.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Close an incident.
///
/// # Errors
///
/// `incident_not_found` for an unknown incident;
/// `incident_rca_incomplete` while the RCA is missing or no learning has
/// been logged; `internal_error` if the close event fails to append or
/// project.
pub fn close_incident(
    store: &EventStore,
    projections: &ProjectionEngine,
    workspace_id: &str,
    incident_id: &str,
    actor: Actor,
    principal_id: Option<&str>,
) -> Result<CloseOutcome, CoreError> {
    let incident = projections
        .with_state(|state| state.incidents.get(incident_id).cloned())
        .filter(|row| row.workspace_id == workspace_id)
        .ok_or_else(|| {
            CoreError::new(ReasonCode::IncidentNotFound, "no such incident")
                .with_detail("incident_id", incident_id)
        })?;

    if incident.status == IncidentStatus::Closed {
        return Ok(CloseOutcome {
            incident_id: incident_id.to_string(),
            already_closed: true,
            event_id: None,
        });
    }
    if !incident.can_close() {
        return Err(CoreError::new(
            ReasonCode::IncidentRcaIncomplete,
            "incident close requires an updated RCA and at least one learning",
        )
        .with_detail("rca_updated_at", incident.rca_updated_at)
        .with_detail("learning_count", incident.learning_count));
    }

    let mut draft = EventDraft::new(event_types::INCIDENT_CLOSED, workspace_id, actor)
        .correlation(incident.correlation_id.clone())
        .data(json!({"incident_id": incident_id}));
    if let Some(principal) = principal_id {
        draft = draft.principal(principal);
    }
    let event = store.append(draft).map_err(|err| {
        CoreError::new(ReasonCode::InternalError, "incident close failed to append")
            .with_source(err)
    })?;
    if projections.apply(&event).is_err() {
        return Err(CoreError::new(
            ReasonCode::InternalError,
            "projection failed; event parked for re-projection",
        )
        .with_detail("event_id", &event.event_id));
    }

    Ok(CloseOutcome {
        incident_id: incident_id.to_string(),
        already_closed: false,
        event_id: Some(event.event_id),
    })
}
