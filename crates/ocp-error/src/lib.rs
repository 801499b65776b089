// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Unified error taxonomy with stable reason codes for the control plane.
//!
//! Every kernel error carries a [`ReasonCode`] (a machine-readable, stable
//! snake_case tag with a fixed HTTP mapping), a short sanitized reason, an
//! optional cause, and structured details. HTTP adapters translate a
//! [`CoreError`] into the wire body verbatim; internal messages never leak
//! past the sanitized `reason`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Severity family per the error-handling design: contract violations are
/// never retried, concurrency-recoverable errors resolve in-process or via
/// client retry, dependency outages are safe to retry, invariant violations
/// are logged and surfaced, fatal errors carry no retry guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Deterministic client fault (4xx).
    Contract,
    /// Request identity / authorization fault.
    Auth,
    /// Concurrency-recoverable (unique violation, lock unavailable, limit).
    Concurrency,
    /// Dependency outage (storage probe, vault, limiter backend).
    Dependency,
    /// Invariant violation detected at write or projection time.
    Invariant,
    /// Bug or unrecoverable failure.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Contract => "contract",
            Self::Auth => "auth",
            Self::Concurrency => "concurrency",
            Self::Dependency => "dependency",
            Self::Invariant => "invariant",
            Self::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ReasonCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable reason code.
///
/// Each variant serializes to its snake_case wire tag, which is guaranteed
/// not to change across patch releases. The HTTP status mapping is part of
/// the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    // -- Intake contract --
    /// Message schema version outside the supported set.
    UnsupportedVersion,
    /// `x-workspace-id` header absent.
    MissingWorkspaceHeader,
    /// `Authorization` bearer token absent.
    MissingBearerToken,
    /// Principal does not map to a known agent.
    UnknownAgent,
    /// Entity belongs to a different workspace than the request.
    UnauthorizedWorkspace,
    /// A required field is absent.
    MissingField,
    /// Payload and payload_ref combination is invalid.
    InvalidPayloadCombination,
    /// A terminal intent arrived without a work link.
    MissingWorkLink,
    /// The intent is not valid for the linked work item type.
    InvalidIntentForType,
    /// Inline payload exceeds the canonical-form size bound.
    PayloadTooLarge,
    /// Referenced artifact does not exist in object storage.
    ArtifactNotFound,
    /// Referenced room does not exist.
    RoomNotFound,
    /// Referenced thread does not exist.
    ThreadNotFound,

    // -- Concurrency --
    /// Token bucket exhausted for the message scope.
    RateLimited,
    /// Heartbeat bucket exhausted, or lease row lock unavailable.
    HeartbeatRateLimited,
    /// Lease held by another agent or expired at verify time.
    LeaseExpiredOrPreempted,
    /// Same idempotency key committed by a different agent.
    IdempotencyConflictUnresolved,
    /// Same idempotency key replayed by the same agent (success envelope).
    DuplicateIdempotentReplay,

    // -- Capability delegation --
    /// Parent token does not exist in the workspace.
    ParentTokenNotFound,
    /// Grantor does not hold the parent token.
    ParentTokenGrantorMismatch,
    /// Child depth would exceed the delegation bound.
    DelegationDepthExceeded,
    /// Parent token was revoked.
    ParentTokenRevoked,
    /// Parent token expired.
    ParentTokenExpired,
    /// Token to revoke does not exist.
    TokenNotFound,

    // -- Work items --
    /// Incident close refused: RCA or learnings incomplete.
    IncidentRcaIncomplete,
    /// Incident does not exist.
    IncidentNotFound,

    // -- Secrets --
    /// Secret does not exist in the workspace.
    SecretNotFound,
    /// Secret name already taken in the workspace.
    SecretNameTaken,
    /// Master key not configured.
    SecretsVaultNotConfigured,

    // -- Dependencies --
    /// Object storage probe failed or returned a server error.
    StorageUnavailable,
    /// Projection layer unavailable.
    ProjectionUnavailable,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    InternalError,
}

impl ReasonCode {
    /// Stable wire tag, e.g. `"lease_expired_or_preempted"`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedVersion => "unsupported_version",
            Self::MissingWorkspaceHeader => "missing_workspace_header",
            Self::MissingBearerToken => "missing_bearer_token",
            Self::UnknownAgent => "unknown_agent",
            Self::UnauthorizedWorkspace => "unauthorized_workspace",
            Self::MissingField => "missing_field",
            Self::InvalidPayloadCombination => "invalid_payload_combination",
            Self::MissingWorkLink => "missing_work_link",
            Self::InvalidIntentForType => "invalid_intent_for_type",
            Self::PayloadTooLarge => "payload_too_large",
            Self::ArtifactNotFound => "artifact_not_found",
            Self::RoomNotFound => "room_not_found",
            Self::ThreadNotFound => "thread_not_found",
            Self::RateLimited => "rate_limited",
            Self::HeartbeatRateLimited => "heartbeat_rate_limited",
            Self::LeaseExpiredOrPreempted => "lease_expired_or_preempted",
            Self::IdempotencyConflictUnresolved => "idempotency_conflict_unresolved",
            Self::DuplicateIdempotentReplay => "duplicate_idempotent_replay",
            Self::ParentTokenNotFound => "parent_token_not_found",
            Self::ParentTokenGrantorMismatch => "parent_token_grantor_mismatch",
            Self::DelegationDepthExceeded => "delegation_depth_exceeded",
            Self::ParentTokenRevoked => "parent_token_revoked",
            Self::ParentTokenExpired => "parent_token_expired",
            Self::TokenNotFound => "token_not_found",
            Self::IncidentRcaIncomplete => "incident_rca_incomplete",
            Self::IncidentNotFound => "incident_not_found",
            Self::SecretNotFound => "secret_not_found",
            Self::SecretNameTaken => "secret_name_taken",
            Self::SecretsVaultNotConfigured => "secrets_vault_not_configured",
            Self::StorageUnavailable => "storage_unavailable",
            Self::ProjectionUnavailable => "projection_unavailable",
            Self::InternalError => "internal_error",
        }
    }

    /// The HTTP status this code maps to at the adapter.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::DuplicateIdempotentReplay => 200,
            Self::UnsupportedVersion
            | Self::MissingField
            | Self::InvalidPayloadCombination
            | Self::MissingWorkLink
            | Self::InvalidIntentForType => 400,
            Self::MissingWorkspaceHeader | Self::MissingBearerToken => 401,
            Self::UnknownAgent
            | Self::UnauthorizedWorkspace
            | Self::LeaseExpiredOrPreempted
            | Self::ParentTokenGrantorMismatch
            | Self::DelegationDepthExceeded
            | Self::ParentTokenRevoked
            | Self::ParentTokenExpired => 403,
            Self::RoomNotFound
            | Self::ThreadNotFound
            | Self::ParentTokenNotFound
            | Self::TokenNotFound
            | Self::IncidentNotFound
            | Self::SecretNotFound => 404,
            Self::IdempotencyConflictUnresolved
            | Self::IncidentRcaIncomplete
            | Self::SecretNameTaken => 409,
            Self::PayloadTooLarge => 413,
            Self::ArtifactNotFound => 422,
            Self::RateLimited | Self::HeartbeatRateLimited => 429,
            Self::InternalError => 500,
            Self::SecretsVaultNotConfigured => 501,
            Self::StorageUnavailable | Self::ProjectionUnavailable => 503,
        }
    }

    /// Severity family this code belongs to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedVersion
            | Self::MissingField
            | Self::InvalidPayloadCombination
            | Self::MissingWorkLink
            | Self::InvalidIntentForType
            | Self::PayloadTooLarge
            | Self::ArtifactNotFound
            | Self::RoomNotFound
            | Self::ThreadNotFound
            | Self::IncidentRcaIncomplete
            | Self::IncidentNotFound
            | Self::SecretNotFound
            | Self::SecretNameTaken
            | Self::TokenNotFound => ErrorKind::Contract,
            Self::MissingWorkspaceHeader
            | Self::MissingBearerToken
            | Self::UnknownAgent
            | Self::UnauthorizedWorkspace
            | Self::ParentTokenNotFound
            | Self::ParentTokenGrantorMismatch
            | Self::DelegationDepthExceeded
            | Self::ParentTokenRevoked
            | Self::ParentTokenExpired => ErrorKind::Auth,
            Self::RateLimited
            | Self::HeartbeatRateLimited
            | Self::LeaseExpiredOrPreempted
            | Self::IdempotencyConflictUnresolved
            | Self::DuplicateIdempotentReplay => ErrorKind::Concurrency,
            Self::StorageUnavailable
            | Self::ProjectionUnavailable
            | Self::SecretsVaultNotConfigured => ErrorKind::Dependency,
            Self::InternalError => ErrorKind::Fatal,
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CoreError
// ---------------------------------------------------------------------------

/// Unified kernel error.
///
/// # Builder usage
///
/// ```
/// use ocp_error::{CoreError, ReasonCode};
///
/// let err = CoreError::new(ReasonCode::PayloadTooLarge, "payload exceeds 8 KiB")
///     .with_detail("size_bytes", 9201)
///     .with_detail("limit_bytes", 8192);
/// assert_eq!(err.http_status(), 413);
/// ```
pub struct CoreError {
    /// Stable reason code.
    pub code: ReasonCode,
    /// Short, sanitized human-readable reason.
    pub reason: String,
    /// Actionable structured details for the client.
    pub details: BTreeMap<String, serde_json::Value>,
    /// Optional underlying cause; never serialized to the wire.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CoreError {
    /// Create an error with the given code and reason.
    pub fn new(code: ReasonCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            details: BTreeMap::new(),
            source: None,
        }
    }

    /// Attach a key-value pair to the details map. Values that fail to
    /// serialize are silently skipped.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.http_status()`.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Shorthand for `self.code.kind()`.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }
}

impl fmt::Debug for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("CoreError");
        d.field("code", &self.code);
        d.field("reason", &self.reason);
        if !self.details.is_empty() {
            d.field("details", &self.details);
        }
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        d.finish()
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.reason)
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Wire body
// ---------------------------------------------------------------------------

/// The JSON error body every failed request carries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    /// Always `true` on the error shape.
    pub error: bool,
    /// Stable reason code tag.
    pub reason_code: ReasonCode,
    /// Short sanitized reason.
    pub reason: String,
    /// Actionable details.
    pub details: BTreeMap<String, serde_json::Value>,
}

impl From<&CoreError> for ErrorBody {
    fn from(err: &CoreError) -> Self {
        Self {
            error: true,
            reason_code: err.code,
            reason: err.reason.clone(),
            details: err.details.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
