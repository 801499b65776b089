// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message request/response shapes and the pure validation layer.

use ocp_core::canonical_json;
use ocp_error::{CoreError, ReasonCode};
use ocp_lease::{LeaseKey, WorkItemType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message schema versions intake accepts.
pub const SUPPORTED_SCHEMA_VERSIONS: &[u32] = &[1];

/// Inline payload bound, measured over the canonical JSON encoding.
pub const MAX_INLINE_PAYLOAD_BYTES: usize = 8 * 1024;

/// The identity the HTTP layer resolved for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    /// From the `x-workspace-id` header.
    pub workspace_id: String,
    /// From the bearer session.
    pub principal_id: String,
}

/// Why the message was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageIntent {
    /// Ordinary message.
    #[default]
    Message,
    /// Liveness ping; separately rate-limited.
    Heartbeat,
    /// Terminal: resolve the linked work item.
    Resolve,
    /// Terminal: reject the linked work item.
    Reject,
}

impl MessageIntent {
    /// Wire tag, also the rate-limit secondary key.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Heartbeat => "heartbeat",
            Self::Resolve => "resolve",
            Self::Reject => "reject",
        }
    }

    /// Whether this intent terminates the linked work item.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolve | Self::Reject)
    }
}

/// Reference to an artifact already uploaded to object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRef {
    /// Object storage key.
    pub object_key: String,
}

/// Links from a message to the work item it acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkLinks {
    /// Linked approval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    /// Linked experiment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    /// Linked incident.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    /// Linked run. Runs are not leased and cannot be resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// The single work item a message references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkTarget {
    /// An approval.
    Approval(String),
    /// An experiment.
    Experiment(String),
    /// An incident.
    Incident(String),
    /// A run (never leased).
    Run(String),
}

impl WorkTarget {
    /// Lease key for leasable targets; `None` for runs.
    #[must_use]
    pub fn lease_key(&self, workspace_id: &str) -> Option<LeaseKey> {
        match self {
            Self::Approval(id) => Some(LeaseKey::new(workspace_id, WorkItemType::Approval, id)),
            Self::Experiment(id) => Some(LeaseKey::new(workspace_id, WorkItemType::Experiment, id)),
            Self::Incident(id) => Some(LeaseKey::new(workspace_id, WorkItemType::Incident, id)),
            Self::Run(_) => None,
        }
    }

    /// The experiment id, when the target is an experiment.
    #[must_use]
    pub fn experiment_id(&self) -> Option<&str> {
        match self {
            Self::Experiment(id) => Some(id),
            _ => None,
        }
    }
}

impl WorkLinks {
    /// Extract the single referenced work item.
    ///
    /// # Errors
    ///
    /// `invalid_payload_combination` when more than one link is set.
    pub fn target(&self) -> Result<Option<WorkTarget>, CoreError> {
        let mut targets = Vec::new();
        if let Some(id) = &self.approval_id {
            targets.push(WorkTarget::Approval(id.clone()));
        }
        if let Some(id) = &self.experiment_id {
            targets.push(WorkTarget::Experiment(id.clone()));
        }
        if let Some(id) = &self.incident_id {
            targets.push(WorkTarget::Incident(id.clone()));
        }
        if let Some(id) = &self.run_id {
            targets.push(WorkTarget::Run(id.clone()));
        }
        match targets.len() {
            0 | 1 => Ok(targets.into_iter().next()),
            n => Err(CoreError::new(
                ReasonCode::InvalidPayloadCombination,
                "work_links must reference exactly one work item",
            )
            .with_detail("links_set", n)),
        }
    }
}

/// The `POST /v1/messages` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRequest {
    /// Message schema version.
    pub schema_version: u32,
    /// Sending agent; must match the authenticated principal's agent.
    pub from_agent_id: String,
    /// Target room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    /// Target thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Correlation id; minted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Intent; defaults to `message`.
    #[serde(default)]
    pub intent: MessageIntent,
    /// Client idempotency key.
    pub idempotency_key: String,
    /// Inline payload; exclusive with `payload_ref`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Artifact reference; exclusive with `payload`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<PayloadRef>,
    /// Linked work item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_links: Option<WorkLinks>,
}

/// Successful intake result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAccepted {
    /// The message.
    pub message_id: String,
    /// The committed `message.created` event.
    pub event_id: String,
    /// Whether this was an idempotent replay of an earlier commit.
    pub idempotent_replay: bool,
    /// `duplicate_idempotent_replay` on replays, absent otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<ReasonCode>,
    /// Whether the write proceeded without a lease row present.
    #[serde(skip)]
    pub lease_warning: bool,
}

/// Schema-and-shape validation; the first protocol step.
///
/// # Errors
///
/// The matching contract reason code for the first failed check.
pub fn validate_shape(req: &MessageRequest) -> Result<Option<WorkTarget>, CoreError> {
    if !SUPPORTED_SCHEMA_VERSIONS.contains(&req.schema_version) {
        return Err(CoreError::new(
            ReasonCode::UnsupportedVersion,
            "unsupported message schema version",
        )
        .with_detail("schema_version", req.schema_version)
        .with_detail("supported", SUPPORTED_SCHEMA_VERSIONS));
    }
    if req.from_agent_id.trim().is_empty() {
        return Err(missing_field("from_agent_id"));
    }
    if req.idempotency_key.trim().is_empty() {
        return Err(missing_field("idempotency_key"));
    }

    match (&req.payload, &req.payload_ref) {
        (None, None) | (Some(_), Some(_)) => {
            return Err(CoreError::new(
                ReasonCode::InvalidPayloadCombination,
                "exactly one of payload and payload_ref is required",
            ));
        }
        (Some(payload), None) => {
            let encoded = canonical_json(payload).map_err(|err| {
                CoreError::new(ReasonCode::InvalidPayloadCombination, "payload is not encodable")
                    .with_source(err)
            })?;
            if encoded.len() > MAX_INLINE_PAYLOAD_BYTES {
                return Err(CoreError::new(
                    ReasonCode::PayloadTooLarge,
                    "inline payload exceeds the canonical-form bound",
                )
                .with_detail("size_bytes", encoded.len())
                .with_detail("limit_bytes", MAX_INLINE_PAYLOAD_BYTES));
            }
        }
        (None, Some(_)) => {
            if req.intent == MessageIntent::Heartbeat {
                return Err(CoreError::new(
                    ReasonCode::InvalidPayloadCombination,
                    "heartbeats must carry an inline payload",
                ));
            }
        }
    }

    let target = req
        .work_links
        .as_ref()
        .map(WorkLinks::target)
        .transpose()?
        .flatten();

    if req.intent.is_terminal() {
        match &target {
            None => {
                return Err(CoreError::new(
                    ReasonCode::MissingWorkLink,
                    "terminal intents require a work link",
                )
                .with_detail("intent", req.intent.as_str()));
            }
            Some(WorkTarget::Run(_)) => {
                return Err(CoreError::new(
                    ReasonCode::InvalidIntentForType,
                    "runs are not resolvable work items",
                )
                .with_detail("intent", req.intent.as_str()));
            }
            Some(_) => {}
        }
    }

    Ok(target)
}

fn missing_field(field: &str) -> CoreError {
    CoreError::new(ReasonCode::MissingField, "a required field is absent")
        .with_detail("field", field)
}
