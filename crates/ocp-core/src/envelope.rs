// SPDX-License-Identifier: MIT OR Apache-2.0

//! The event envelope and its draft builder.
//!
//! An [`EventEnvelope`] is the immutable unit of record. Clients build an
//! [`EventDraft`]; the event store completes it with the stream sequence,
//! the chain hashes, and `recorded_at` at append time.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids;

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Kind of actor recorded against an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// A human operator.
    User,
    /// An internal service.
    Service,
    /// An autonomous agent.
    Agent,
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Service => "service",
            Self::Agent => "agent",
        };
        f.write_str(s)
    }
}

/// The actor label stamped on an envelope. Authorization uses the principal,
/// not this label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Kind of actor.
    pub actor_type: ActorType,
    /// Opaque actor identifier.
    pub actor_id: String,
}

impl Actor {
    /// Agent actor shorthand.
    #[must_use]
    pub fn agent(id: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::Agent,
            actor_id: id.into(),
        }
    }

    /// Service actor shorthand.
    #[must_use]
    pub fn service(id: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::Service,
            actor_id: id.into(),
        }
    }

    /// User actor shorthand.
    #[must_use]
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::User,
            actor_id: id.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Zone / redaction
// ---------------------------------------------------------------------------

/// Execution zone the act took place in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    /// Unsupervised sandbox.
    #[default]
    Sandbox,
    /// Human-supervised execution.
    Supervised,
    /// High-stakes, policy-gated execution.
    HighStakes,
}

/// Redaction applied to the envelope's display form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RedactionLevel {
    /// Nothing redacted.
    #[default]
    None,
    /// Sensitive fields redacted.
    Partial,
    /// Fully redacted.
    Full,
}

// ---------------------------------------------------------------------------
// Stream coordinates
// ---------------------------------------------------------------------------

/// Logical stream family an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    /// Workspace-wide stream.
    Workspace,
    /// Per-room stream.
    Room,
    /// Per-thread stream.
    Thread,
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Workspace => "workspace",
            Self::Room => "room",
            Self::Thread => "thread",
        };
        f.write_str(s)
    }
}

impl StreamType {
    /// Parse from the wire form used in audit routes.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "workspace" => Some(Self::Workspace),
            "room" => Some(Self::Room),
            "thread" => Some(Self::Thread),
            _ => None,
        }
    }
}

/// Identity of a stream: the pair every ordering guarantee is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    /// Stream family.
    pub stream_type: StreamType,
    /// Stream identifier within the family.
    pub stream_id: String,
}

impl StreamKey {
    /// Workspace stream for the given workspace.
    #[must_use]
    pub fn workspace(workspace_id: impl Into<String>) -> Self {
        Self {
            stream_type: StreamType::Workspace,
            stream_id: workspace_id.into(),
        }
    }

    /// Room stream.
    #[must_use]
    pub fn room(room_id: impl Into<String>) -> Self {
        Self {
            stream_type: StreamType::Room,
            stream_id: room_id.into(),
        }
    }

    /// Thread stream.
    #[must_use]
    pub fn thread(thread_id: impl Into<String>) -> Self {
        Self {
            stream_type: StreamType::Thread,
            stream_id: thread_id.into(),
        }
    }
}

/// Stream coordinates as persisted on an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRef {
    /// Stream family.
    pub stream_type: StreamType,
    /// Stream identifier.
    pub stream_id: String,
    /// Monotone per-stream sequence, starting at 1.
    pub stream_seq: i64,
}

impl StreamRef {
    /// The `(stream_type, stream_id)` key of this reference.
    #[must_use]
    pub fn key(&self) -> StreamKey {
        StreamKey {
            stream_type: self.stream_type,
            stream_id: self.stream_id.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventEnvelope
// ---------------------------------------------------------------------------

/// A committed, immutable event row.
///
/// Envelopes are created by intake, never mutated, never deleted. The two
/// hash fields bind the envelope into its stream's chain and are excluded
/// from the canonical form they are computed over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event identifier (`evt_…`).
    pub event_id: String,
    /// Dotted event type name, e.g. `message.created`.
    pub event_type: String,
    /// Schema version of the `data` payload.
    pub event_version: u32,
    /// When the act happened, per the caller.
    pub occurred_at: DateTime<Utc>,
    /// When the store committed the row.
    pub recorded_at: DateTime<Utc>,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Owning mission, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mission_id: Option<String>,
    /// Owning room, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    /// Owning thread, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Linked run, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Linked step, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Actor label.
    pub actor: Actor,
    /// Authorization subject behind the actor, when resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_principal_id: Option<String>,
    /// Execution zone.
    pub zone: Zone,
    /// Stream coordinates.
    pub stream: StreamRef,
    /// Correlation identifier grouping related events.
    pub correlation_id: String,
    /// Event in the same workspace that caused this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    /// Redaction applied to the display form.
    pub redaction_level: RedactionLevel,
    /// Whether `data` may contain secret material.
    pub contains_secrets: bool,
    /// Policy evaluation context.
    #[serde(default)]
    pub policy_context: BTreeMap<String, Value>,
    /// Model invocation context.
    #[serde(default)]
    pub model_context: BTreeMap<String, Value>,
    /// Display hints for UI consumers.
    #[serde(default)]
    pub display: BTreeMap<String, Value>,
    /// Arbitrary event payload.
    pub data: Value,
    /// Client-supplied idempotency key, unique per `(workspace, type)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Hash of the predecessor in the same stream; `None` at seq 1.
    pub prev_event_hash: Option<String>,
    /// Chain hash of this envelope.
    pub event_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// EventDraft
// ---------------------------------------------------------------------------

/// An envelope before the store assigns sequence, hashes, and `recorded_at`.
///
/// # Examples
///
/// ```
/// use ocp_core::{Actor, EventDraft, StreamKey};
/// use serde_json::json;
///
/// let draft = EventDraft::new("message.created", "ws1", Actor::agent("ag1"))
///     .stream(StreamKey::room("room1"))
///     .room("room1")
///     .data(json!({"text": "hello"}))
///     .idempotency_key("K1");
/// assert_eq!(draft.event_type, "message.created");
/// ```
#[derive(Debug, Clone)]
pub struct EventDraft {
    /// Dotted event type name.
    pub event_type: String,
    /// Schema version of `data`.
    pub event_version: u32,
    /// When the act happened; defaults to the append instant.
    pub occurred_at: Option<DateTime<Utc>>,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Optional entity links.
    pub mission_id: Option<String>,
    /// Owning room.
    pub room_id: Option<String>,
    /// Owning thread.
    pub thread_id: Option<String>,
    /// Linked run.
    pub run_id: Option<String>,
    /// Linked step.
    pub step_id: Option<String>,
    /// Actor label.
    pub actor: Actor,
    /// Authorization subject, when resolved.
    pub actor_principal_id: Option<String>,
    /// Execution zone.
    pub zone: Zone,
    /// Target stream; defaults to the workspace stream.
    pub stream: StreamKey,
    /// Correlation id; minted when absent.
    pub correlation_id: Option<String>,
    /// Causing event.
    pub causation_id: Option<String>,
    /// Redaction level.
    pub redaction_level: RedactionLevel,
    /// Whether `data` may contain secret material.
    pub contains_secrets: bool,
    /// Policy evaluation context.
    pub policy_context: BTreeMap<String, Value>,
    /// Model invocation context.
    pub model_context: BTreeMap<String, Value>,
    /// Display hints.
    pub display: BTreeMap<String, Value>,
    /// Event payload.
    pub data: Value,
    /// Idempotency key.
    pub idempotency_key: Option<String>,
}

impl EventDraft {
    /// Start a draft for the given type, workspace, and actor. The stream
    /// defaults to the workspace stream.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        workspace_id: impl Into<String>,
        actor: Actor,
    ) -> Self {
        let workspace_id = workspace_id.into();
        Self {
            event_type: event_type.into(),
            event_version: 1,
            occurred_at: None,
            workspace_id: workspace_id.clone(),
            mission_id: None,
            room_id: None,
            thread_id: None,
            run_id: None,
            step_id: None,
            actor,
            actor_principal_id: None,
            zone: Zone::default(),
            stream: StreamKey::workspace(workspace_id),
            correlation_id: None,
            causation_id: None,
            redaction_level: RedactionLevel::default(),
            contains_secrets: false,
            policy_context: BTreeMap::new(),
            model_context: BTreeMap::new(),
            display: BTreeMap::new(),
            data: Value::Null,
            idempotency_key: None,
        }
    }

    /// Target a specific stream.
    #[must_use]
    pub fn stream(mut self, key: StreamKey) -> Self {
        self.stream = key;
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Set the occurrence timestamp.
    #[must_use]
    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// Link a room.
    #[must_use]
    pub fn room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    /// Link a thread.
    #[must_use]
    pub fn thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Link a run.
    #[must_use]
    pub fn run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Link a step.
    #[must_use]
    pub fn step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    /// Record the resolved principal.
    #[must_use]
    pub fn principal(mut self, principal_id: impl Into<String>) -> Self {
        self.actor_principal_id = Some(principal_id.into());
        self
    }

    /// Set the execution zone.
    #[must_use]
    pub fn zone(mut self, zone: Zone) -> Self {
        self.zone = zone;
        self
    }

    /// Set the correlation id.
    #[must_use]
    pub fn correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Pin causation to an earlier event.
    #[must_use]
    pub fn caused_by(mut self, event_id: impl Into<String>) -> Self {
        self.causation_id = Some(event_id.into());
        self
    }

    /// Attach an idempotency key.
    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Mark the payload as containing secret material.
    #[must_use]
    pub fn contains_secrets(mut self, flag: bool) -> Self {
        self.contains_secrets = flag;
        self
    }

    /// Complete the draft into an envelope. Called by the store at append
    /// time; the hash fields stay `None` until the chain is computed.
    #[must_use]
    pub fn into_envelope(self, stream_seq: i64, recorded_at: DateTime<Utc>) -> EventEnvelope {
        EventEnvelope {
            event_id: ids::event_id(),
            event_type: self.event_type,
            event_version: self.event_version,
            occurred_at: self.occurred_at.unwrap_or(recorded_at),
            recorded_at,
            workspace_id: self.workspace_id,
            mission_id: self.mission_id,
            room_id: self.room_id,
            thread_id: self.thread_id,
            run_id: self.run_id,
            step_id: self.step_id,
            actor: self.actor,
            actor_principal_id: self.actor_principal_id,
            zone: self.zone,
            stream: StreamRef {
                stream_type: self.stream.stream_type,
                stream_id: self.stream.stream_id,
                stream_seq,
            },
            correlation_id: self.correlation_id.unwrap_or_else(ids::correlation_id),
            causation_id: self.causation_id,
            redaction_level: self.redaction_level,
            contains_secrets: self.contains_secrets,
            policy_context: self.policy_context,
            model_context: self.model_context,
            display: self.display,
            data: self.data,
            idempotency_key: self.idempotency_key,
            prev_event_hash: None,
            event_hash: None,
        }
    }
}
