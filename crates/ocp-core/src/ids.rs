// SPDX-License-Identifier: MIT OR Apache-2.0

//! Opaque, URL-safe, domain-prefixed identifiers.
//!
//! Every entity the control plane mints carries a short domain prefix so an
//! identifier is self-describing in logs and audit trails. The random part
//! is a simple-form UUID v4, which keeps IDs URL-safe and collision
//! resistant without a coordination point.

use uuid::Uuid;

/// Mint an identifier with the given domain prefix.
///
/// # Examples
///
/// ```
/// let id = ocp_core::ids::prefixed("evt");
/// assert!(id.starts_with("evt_"));
/// assert_eq!(id.len(), 4 + 32);
/// ```
#[must_use]
pub fn prefixed(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Event identifier (`evt_…`).
#[must_use]
pub fn event_id() -> String {
    prefixed("evt")
}

/// Message identifier (`msg_…`).
#[must_use]
pub fn message_id() -> String {
    prefixed("msg")
}

/// Correlation identifier (`cor_…`).
#[must_use]
pub fn correlation_id() -> String {
    prefixed("cor")
}

/// Run identifier (`run_…`).
#[must_use]
pub fn run_id() -> String {
    prefixed("run")
}

/// Step identifier (`stp_…`).
#[must_use]
pub fn step_id() -> String {
    prefixed("stp")
}

/// Tool call identifier (`tool_…`).
#[must_use]
pub fn tool_call_id() -> String {
    prefixed("tool")
}

/// Artifact identifier (`art_…`).
#[must_use]
pub fn artifact_id() -> String {
    prefixed("art")
}

/// Scorecard identifier (`scd_…`).
#[must_use]
pub fn scorecard_id() -> String {
    prefixed("scd")
}

/// Lesson identifier (`learn_…`).
#[must_use]
pub fn lesson_id() -> String {
    prefixed("learn")
}

/// Workspace owner identifier (`own_…`).
#[must_use]
pub fn owner_id() -> String {
    prefixed("own")
}

/// Principal identifier (`prn_…`).
#[must_use]
pub fn principal_id() -> String {
    prefixed("prn")
}

/// Capability token identifier (`cap_…`).
#[must_use]
pub fn capability_token_id() -> String {
    prefixed("cap")
}

/// Capability delegation edge identifier (`cedg_…`).
#[must_use]
pub fn delegation_edge_id() -> String {
    prefixed("cedg")
}

/// Secret identifier (`sec_…`).
#[must_use]
pub fn secret_id() -> String {
    prefixed("sec")
}

/// Skill package identifier (`spkg_…`).
#[must_use]
pub fn skill_package_id() -> String {
    prefixed("spkg")
}
