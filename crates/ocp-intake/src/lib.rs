// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Message intake.
//!
//! The most complicated write in the system: an ordered protocol of schema
//! validation, identity resolution, cross-entity checks, an out-of-band
//! artifact probe, an idempotency pre-probe, rate control, and a
//! lease-guarded transaction that appends `message.created` and applies
//! the projectors. Every step aborts with a stable reason code on first
//! failure, and a rate-limit denial never consumes an idempotency key.

mod incidents;
mod intake;
mod message;
mod probe;
mod registry;

pub use incidents::{CloseOutcome, close_incident};
pub use intake::{MESSAGE_SCOPE, MessageIntake};
pub use message::{
    MAX_INLINE_PAYLOAD_BYTES, MessageAccepted, MessageIntent, MessageRequest, PayloadRef,
    RequestIdentity, SUPPORTED_SCHEMA_VERSIONS, WorkLinks, WorkTarget,
};
pub use probe::{ArtifactProbe, ArtifactProbeOutcome, HttpArtifactProbe, NullArtifactProbe};
pub use registry::{AgentRow, Registry, RoomRecord, ThreadRecord};
