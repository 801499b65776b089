// SPDX-License-Identifier: MIT OR Apache-2.0

//! The hash-chain primitive.
//!
//! `H(envelope, prev) = SHA-256(canonical(envelope_without_hashes) || prev)`
//! where `prev` is the hex digest of the predecessor, or the empty string
//! for the first event of a stream. Output is lowercase hex.

use sha2::{Digest, Sha256};

/// Compute the chain hash over a canonical envelope encoding and the
/// predecessor's hash.
///
/// # Examples
///
/// ```
/// let h1 = ocp_core::chain_hash("{}", None);
/// let h2 = ocp_core::chain_hash("{}", Some(h1.as_str()));
/// assert_eq!(h1.len(), 64);
/// assert_ne!(h1, h2);
/// ```
#[must_use]
pub fn chain_hash(canonical: &str, prev_event_hash: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    if let Some(prev) = prev_event_hash {
        hasher.update(prev.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
