// SPDX-License-Identifier: MIT OR Apache-2.0

//! Principals: the authorization subjects behind actor labels.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use ocp_core::{ActorType, SharedClock, ids};
use serde::{Deserialize, Serialize};

/// Kind of principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalType {
    /// A human operator.
    User,
    /// An internal service.
    Service,
    /// An autonomous agent.
    Agent,
}

impl From<PrincipalType> for ActorType {
    fn from(t: PrincipalType) -> Self {
        match t {
            PrincipalType::User => ActorType::User,
            PrincipalType::Service => ActorType::Service,
            PrincipalType::Agent => ActorType::Agent,
        }
    }
}

/// A principal row. Revocation is soft: the row stays for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Identifier (`prn_…`).
    pub principal_id: String,
    /// Kind of subject.
    pub principal_type: PrincipalType,
    /// Legacy actor mapping, for records predating principals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_actor_type: Option<ActorType>,
    /// Legacy actor identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_actor_id: Option<String>,
    /// Soft-revocation instant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

impl Principal {
    /// Whether the principal is usable.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// Shared principal table. Clones share state.
#[derive(Clone)]
pub struct PrincipalRegistry {
    rows: Arc<Mutex<HashMap<String, Principal>>>,
    clock: SharedClock,
}

impl std::fmt::Debug for PrincipalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrincipalRegistry").finish_non_exhaustive()
    }
}

impl PrincipalRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            rows: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Mint and register a principal.
    pub fn register(&self, principal_type: PrincipalType) -> Principal {
        let principal = Principal {
            principal_id: ids::principal_id(),
            principal_type,
            legacy_actor_type: None,
            legacy_actor_id: None,
            revoked_at: None,
            created_at: self.clock.now(),
        };
        self.rows
            .lock()
            .expect("principal lock poisoned")
            .insert(principal.principal_id.clone(), principal.clone());
        principal
    }

    /// Look up a principal.
    #[must_use]
    pub fn get(&self, principal_id: &str) -> Option<Principal> {
        self.rows
            .lock()
            .expect("principal lock poisoned")
            .get(principal_id)
            .cloned()
    }

    /// Soft-revoke a principal. Idempotent.
    pub fn revoke(&self, principal_id: &str) {
        let now = self.clock.now();
        if let Some(p) = self
            .rows
            .lock()
            .expect("principal lock poisoned")
            .get_mut(principal_id)
        {
            p.revoked_at.get_or_insert(now);
        }
    }

    /// Whether the principal exists and is not revoked.
    #[must_use]
    pub fn is_active(&self, principal_id: &str) -> bool {
        self.get(principal_id).is_some_and(|p| p.is_active())
    }
}
