// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! The stable contract for the ops control plane.
//!
//! If you only take one dependency, take this one. It defines the event
//! envelope that every other crate appends, projects, tails, or verifies,
//! together with the leaf utilities the kernel is built on: domain-prefixed
//! identifiers, the clock abstraction, the canonical JSON encoder, and the
//! hash-chain primitive.

/// Canonical (key-sorted, null-stable) JSON encoding shared by the appender
/// and the audit verifier.
pub mod canonical;
/// Hash-chain primitive binding an event to its predecessor.
pub mod chain;
/// Clock abstraction with system and manual implementations.
pub mod clock;
/// Event envelope, stream coordinates, and the draft builder.
pub mod envelope;
/// Event type constants recorded by the kernel.
pub mod event_types;
/// Opaque, URL-safe, domain-prefixed identifiers.
pub mod ids;

pub use canonical::{CanonicalError, canonical_envelope, canonical_json};
pub use chain::chain_hash;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock, system_clock};
pub use envelope::{
    Actor, ActorType, EventDraft, EventEnvelope, RedactionLevel, StreamKey, StreamRef, StreamType,
    Zone,
};

/// Current contract version embedded in every envelope's `event_version`
/// default and reported by the daemon health endpoint.
pub const CONTRACT_VERSION: &str = "ocp/v1";

/// Tolerated gap by which `occurred_at` may run ahead of `recorded_at`.
pub const CLOCK_SKEW_TOLERANCE_MS: i64 = 300_000;
