// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Append-only event log for the ops control plane.
//!
//! The store owns the per-stream sequence counter, the tamper-evident hash
//! chain, the idempotency uniqueness constraint, and causation linkage. It
//! is the single source of truth; every projection is rebuildable from it.
//! Appends to one stream serialize on the sequence claim, which in this
//! process-local rendition is the store's interior lock.

mod dlq;
mod store;
mod verify;

pub use dlq::{DeadLetter, DeadLetterQueue};
pub use store::{AppendError, EventStore};
pub use verify::{Mismatch, MismatchKind, VerifyReport, verify_events};
