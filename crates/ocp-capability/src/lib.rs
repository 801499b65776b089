// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Capability delegation for the ops control plane.
//!
//! A capability token is a scoped, attenuable, optionally-delegated grant
//! of authority within a workspace. Delegation only ever narrows: a child's
//! scopes are the per-key intersection of the parent's and the requested
//! set, the chain is bounded at depth 3, and revocation is explicit and
//! non-cascading, and consumers check chain validity at use.

mod principals;
mod scopes;
mod service;

pub use principals::{Principal, PrincipalRegistry, PrincipalType};
pub use scopes::{DataAccessScopes, ScopeSet};
pub use service::{
    CapabilityService, CapabilityToken, DelegationEdge, DeniedReason, GrantRequest,
    MAX_DELEGATION_DEPTH, RevokeOutcome,
};
