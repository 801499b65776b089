// SPDX-License-Identifier: MIT OR Apache-2.0

//! Grant, delegation, and revocation of capability tokens.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use ocp_core::{Actor, EventDraft, SharedClock, event_types, ids};
use ocp_error::{CoreError, ReasonCode};
use ocp_store::EventStore;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::scopes::ScopeSet;

/// Maximum delegation depth: a root token is depth 0, its furthest
/// descendant depth 3.
pub const MAX_DELEGATION_DEPTH: u32 = 3;

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// A capability token row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    /// Identifier (`cap_…`).
    pub token_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Holder.
    pub issued_to_principal_id: String,
    /// Grantor.
    pub granted_by_principal_id: String,
    /// Parent token when delegated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_token_id: Option<String>,
    /// Scopes in canonical compact shape.
    pub scopes: ScopeSet,
    /// Expiry, if bounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    /// Revocation instant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

impl CapabilityToken {
    /// Whether the token itself (ignoring ancestors) is usable now.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.valid_until.is_none_or(|until| until > now)
    }
}

/// A delegation edge row: child exists iff its parent existed at grant
/// time and the grantor held the parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationEdge {
    /// Identifier (`cedg_…`).
    pub edge_id: String,
    /// Parent token.
    pub parent_token_id: String,
    /// Child token.
    pub child_token_id: String,
    /// Grantor (the parent's holder).
    pub granted_by_principal_id: String,
    /// Child holder.
    pub issued_to_principal_id: String,
    /// Child depth (≥ 1).
    pub depth: u32,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

/// Why a delegation was refused. Serialized verbatim into the
/// `agent.delegation.attempted` audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeniedReason {
    /// Parent token does not exist in the workspace.
    ParentTokenNotFound,
    /// Grantor does not hold the parent token.
    ParentTokenGrantorMismatch,
    /// Child depth would exceed [`MAX_DELEGATION_DEPTH`].
    DelegationDepthExceeded,
    /// Parent token is revoked.
    ParentTokenRevoked,
    /// Parent token is expired.
    ParentTokenExpired,
}

impl DeniedReason {
    fn reason_code(self) -> ReasonCode {
        match self {
            Self::ParentTokenNotFound => ReasonCode::ParentTokenNotFound,
            Self::ParentTokenGrantorMismatch => ReasonCode::ParentTokenGrantorMismatch,
            Self::DelegationDepthExceeded => ReasonCode::DelegationDepthExceeded,
            Self::ParentTokenRevoked => ReasonCode::ParentTokenRevoked,
            Self::ParentTokenExpired => ReasonCode::ParentTokenExpired,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::ParentTokenNotFound => "parent_token_not_found",
            Self::ParentTokenGrantorMismatch => "parent_token_grantor_mismatch",
            Self::DelegationDepthExceeded => "delegation_depth_exceeded",
            Self::ParentTokenRevoked => "parent_token_revoked",
            Self::ParentTokenExpired => "parent_token_expired",
        }
    }
}

/// Inputs to [`CapabilityService::grant`].
#[derive(Debug, Clone)]
pub struct GrantRequest {
    /// Tenant boundary.
    pub workspace_id: String,
    /// Holder of the new token.
    pub issued_to_principal_id: String,
    /// Grantor; for delegated grants, must hold the parent.
    pub granted_by_principal_id: String,
    /// Parent token; `None` makes this a root issuance.
    pub parent_token_id: Option<String>,
    /// Requested scopes.
    pub requested_scopes: ScopeSet,
    /// Expiry, if bounded.
    pub valid_until: Option<DateTime<Utc>>,
}

/// Result of [`CapabilityService::revoke`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeOutcome {
    /// The token that was (already) revoked.
    pub token_id: String,
    /// Whether the token had been revoked before this call.
    pub already_revoked: bool,
}

// ---------------------------------------------------------------------------
// CapabilityService
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    tokens: HashMap<String, CapabilityToken>,
    edges: Vec<DelegationEdge>,
}

/// Owner of the token and edge tables. Clones share state.
#[derive(Clone)]
pub struct CapabilityService {
    tables: Arc<Mutex<Tables>>,
    store: EventStore,
    clock: SharedClock,
}

impl fmt::Debug for CapabilityService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityService").finish_non_exhaustive()
    }
}

impl CapabilityService {
    /// Create a service that audits into the given store.
    #[must_use]
    pub fn new(store: EventStore, clock: SharedClock) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            store,
            clock,
        }
    }

    /// Issue or delegate a capability token.
    ///
    /// A root issuance (no parent) takes the requested scopes verbatim;
    /// the caller is trusted by higher-level auth. A delegated grant
    /// validates the parent, attenuates scopes per key, computes the child
    /// depth, and persists a delegation edge. Every denial appends an
    /// `agent.delegation.attempted` audit event with the `denied_reason`.
    ///
    /// # Errors
    ///
    /// A [`CoreError`] carrying the matching denial reason code.
    pub fn grant(&self, req: GrantRequest) -> Result<CapabilityToken, CoreError> {
        let now = self.clock.now();

        let Some(parent_id) = req.parent_token_id.clone() else {
            let token = self.insert_token(&req, req.requested_scopes.clone().normalized(), None, now);
            self.emit_granted(&token, 0);
            return Ok(token);
        };

        let (parent, depth) = {
            let tables = self.tables.lock().expect("capability lock poisoned");
            let parent = tables
                .tokens
                .get(&parent_id)
                .filter(|t| t.workspace_id == req.workspace_id)
                .cloned();
            match parent {
                None => {
                    drop(tables);
                    return Err(self.deny(&req, &parent_id, DeniedReason::ParentTokenNotFound));
                }
                Some(parent) => {
                    let depth = match parent_depth(&tables.tokens, &parent) {
                        Ok(d) => d,
                        Err(err) => {
                            drop(tables);
                            return Err(err);
                        }
                    };
                    (parent, depth)
                }
            }
        };

        if parent.revoked_at.is_some() {
            return Err(self.deny(&req, &parent_id, DeniedReason::ParentTokenRevoked));
        }
        if parent.valid_until.is_some_and(|until| until <= now) {
            return Err(self.deny(&req, &parent_id, DeniedReason::ParentTokenExpired));
        }
        if parent.issued_to_principal_id != req.granted_by_principal_id {
            return Err(self.deny(&req, &parent_id, DeniedReason::ParentTokenGrantorMismatch));
        }
        let child_depth = depth + 1;
        if child_depth > MAX_DELEGATION_DEPTH {
            return Err(self.deny(&req, &parent_id, DeniedReason::DelegationDepthExceeded));
        }

        let scopes = req.requested_scopes.attenuate(&parent.scopes);
        let token = self.insert_token(&req, scopes, Some(parent_id.clone()), now);
        {
            let mut tables = self.tables.lock().expect("capability lock poisoned");
            tables.edges.push(DelegationEdge {
                edge_id: ids::delegation_edge_id(),
                parent_token_id: parent_id,
                child_token_id: token.token_id.clone(),
                granted_by_principal_id: req.granted_by_principal_id.clone(),
                issued_to_principal_id: req.issued_to_principal_id.clone(),
                depth: child_depth,
                created_at: now,
            });
        }
        self.emit_granted(&token, child_depth);
        Ok(token)
    }

    /// Revoke a token. Idempotent: re-revoking reports `already_revoked`.
    /// Revocation does not cascade to descendants; chain validity is
    /// checked at use.
    ///
    /// # Errors
    ///
    /// [`ReasonCode::TokenNotFound`] when the token does not exist in the
    /// workspace.
    pub fn revoke(
        &self,
        workspace_id: &str,
        token_id: &str,
        reason: Option<&str>,
    ) -> Result<RevokeOutcome, CoreError> {
        let now = self.clock.now();
        let outcome = {
            let mut tables = self.tables.lock().expect("capability lock poisoned");
            let token = tables
                .tokens
                .get_mut(token_id)
                .filter(|t| t.workspace_id == workspace_id)
                .ok_or_else(|| {
                    CoreError::new(ReasonCode::TokenNotFound, "no such capability token")
                        .with_detail("token_id", token_id)
                })?;
            let already_revoked = token.revoked_at.is_some();
            token.revoked_at.get_or_insert(now);
            RevokeOutcome {
                token_id: token_id.to_string(),
                already_revoked,
            }
        };

        if !outcome.already_revoked {
            let draft = EventDraft::new(
                event_types::CAPABILITY_REVOKED,
                workspace_id,
                Actor::service("capability-service"),
            )
            .data(json!({
                "token_id": token_id,
                "reason": reason,
            }));
            if let Err(err) = self.store.append(draft) {
                tracing::error!(token_id, error = %err, "failed to audit capability revocation");
            }
        }
        Ok(outcome)
    }

    /// Look up a token.
    #[must_use]
    pub fn get(&self, token_id: &str) -> Option<CapabilityToken> {
        self.tables
            .lock()
            .expect("capability lock poisoned")
            .tokens
            .get(token_id)
            .cloned()
    }

    /// Delegation edges recorded beneath a parent token.
    #[must_use]
    pub fn edges_from(&self, parent_token_id: &str) -> Vec<DelegationEdge> {
        self.tables
            .lock()
            .expect("capability lock poisoned")
            .edges
            .iter()
            .filter(|e| e.parent_token_id == parent_token_id)
            .cloned()
            .collect()
    }

    /// Whether the token and all its ancestors are unrevoked and unexpired
    /// at the current instant. Revocation does not cascade in storage, so
    /// use-time checks walk the chain.
    #[must_use]
    pub fn chain_valid(&self, token_id: &str) -> bool {
        let now = self.clock.now();
        let tables = self.tables.lock().expect("capability lock poisoned");
        let mut current = token_id.to_string();
        let mut visited = HashSet::new();
        loop {
            if !visited.insert(current.clone()) {
                return false;
            }
            let Some(token) = tables.tokens.get(&current) else {
                return false;
            };
            if !token.is_valid_at(now) {
                return false;
            }
            match &token.parent_token_id {
                Some(parent) => current = parent.clone(),
                None => return true,
            }
        }
    }

    fn insert_token(
        &self,
        req: &GrantRequest,
        scopes: ScopeSet,
        parent_token_id: Option<String>,
        now: DateTime<Utc>,
    ) -> CapabilityToken {
        let token = CapabilityToken {
            token_id: ids::capability_token_id(),
            workspace_id: req.workspace_id.clone(),
            issued_to_principal_id: req.issued_to_principal_id.clone(),
            granted_by_principal_id: req.granted_by_principal_id.clone(),
            parent_token_id,
            scopes,
            valid_until: req.valid_until,
            revoked_at: None,
            created_at: now,
        };
        self.tables
            .lock()
            .expect("capability lock poisoned")
            .tokens
            .insert(token.token_id.clone(), token.clone());
        token
    }

    fn emit_granted(&self, token: &CapabilityToken, depth: u32) {
        let draft = EventDraft::new(
            event_types::CAPABILITY_GRANTED,
            &token.workspace_id,
            Actor::service("capability-service"),
        )
        .principal(token.granted_by_principal_id.clone())
        .data(json!({
            "token_id": token.token_id,
            "issued_to_principal_id": token.issued_to_principal_id,
            "granted_by_principal_id": token.granted_by_principal_id,
            "parent_token_id": token.parent_token_id,
            "scopes": token.scopes,
            "depth": depth,
        }));
        if let Err(err) = self.store.append(draft) {
            tracing::error!(token_id = %token.token_id, error = %err, "failed to audit capability grant");
        }
    }

    fn deny(&self, req: &GrantRequest, parent_id: &str, reason: DeniedReason) -> CoreError {
        let draft = EventDraft::new(
            event_types::DELEGATION_ATTEMPTED,
            &req.workspace_id,
            Actor::service("capability-service"),
        )
        .principal(req.granted_by_principal_id.clone())
        .data(json!({
            "parent_token_id": parent_id,
            "issued_to_principal_id": req.issued_to_principal_id,
            "granted_by_principal_id": req.granted_by_principal_id,
            "requested_scopes": req.requested_scopes,
            "denied_reason": reason.as_str(),
        }));
        if let Err(err) = self.store.append(draft) {
            tracing::error!(error = %err, "failed to audit denied delegation");
        }
        CoreError::new(reason.reason_code(), "delegation denied")
            .with_detail("denied_reason", reason.as_str())
            .with_detail("parent_token_id", parent_id)
    }
}

/// Depth of a token: edges walked to its root. Cycles are rejected as an
/// invariant violation.
fn parent_depth(
    tokens: &HashMap<String, CapabilityToken>,
    token: &CapabilityToken,
) -> Result<u32, CoreError> {
    let mut depth = 0u32;
    let mut visited: HashSet<&str> = HashSet::from([token.token_id.as_str()]);
    let mut current = token;
    while let Some(parent_id) = &current.parent_token_id {
        if !visited.insert(parent_id.as_str()) {
            return Err(CoreError::new(
                ReasonCode::InternalError,
                "delegation cycle detected",
            )
            .with_detail("token_id", &token.token_id));
        }
        let Some(parent) = tokens.get(parent_id) else {
            // A dangling parent pointer is an invariant violation too.
            return Err(CoreError::new(
                ReasonCode::InternalError,
                "delegation chain broken",
            )
            .with_detail("token_id", &token.token_id));
        };
        depth += 1;
        current = parent;
    }
    Ok(depth)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ocp_core::{ManualClock, StreamKey};

    fn service() -> (CapabilityService, EventStore, ManualClock) {
        let clock = ManualClock::at(Utc::now());
        let store = EventStore::new(Arc::new(clock.clone()));
        (
            CapabilityService::new(store.clone(), Arc::new(clock.clone())),
            store,
            clock,
        )
    }

    fn root_req(scopes: ScopeSet) -> GrantRequest {
        GrantRequest {
            workspace_id: "ws1".into(),
            issued_to_principal_id: "prn_p1".into(),
            granted_by_principal_id: "prn_root".into(),
            parent_token_id: None,
            requested_scopes: scopes,
            valid_until: None,
        }
    }

    fn child_req(parent: &CapabilityToken, from: &str, to: &str, scopes: ScopeSet) -> GrantRequest {
        GrantRequest {
            workspace_id: "ws1".into(),
            issued_to_principal_id: to.into(),
            granted_by_principal_id: from.into(),
            parent_token_id: Some(parent.token_id.clone()),
            requested_scopes: scopes,
            valid_until: None,
        }
    }

    // -- grant ------------------------------------------------------------

    #[test]
    fn root_issuance_takes_scopes_verbatim() {
        let (svc, store, _) = service();
        let scopes = ScopeSet::new().rooms(&["r1", "r2"]).tools(&["t1"]);
        let token = svc.grant(root_req(scopes.clone())).unwrap();
        assert_eq!(token.scopes, scopes);
        assert!(token.parent_token_id.is_none());
        let events = store.read_stream(&StreamKey::workspace("ws1"), 0, 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "agent.capability.granted");
    }

    #[test]
    fn delegation_attenuates_scopes() {
        let (svc, _, _) = service();
        let root = svc
            .grant(root_req(
                ScopeSet::new().rooms(&["r1", "r2"]).tools(&["t1", "t2", "t3"]),
            ))
            .unwrap();
        let child = svc
            .grant(child_req(
                &root,
                "prn_p1",
                "prn_p2",
                ScopeSet::new().rooms(&["r2", "r3"]).tools(&["t1", "t4"]),
            ))
            .unwrap();
        assert_eq!(child.scopes, ScopeSet::new().rooms(&["r2"]).tools(&["t1"]));
        assert!(child.scopes.is_subset_of(&root.scopes));
        let edges = svc.edges_from(&root.token_id);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].depth, 1);
    }

    #[test]
    fn depth_bound_at_three() {
        let (svc, store, _) = service();
        let root = svc
            .grant(root_req(ScopeSet::new().rooms(&["r1"])))
            .unwrap();
        let scope = ScopeSet::new().rooms(&["r1"]);
        let d1 = svc
            .grant(child_req(&root, "prn_p1", "prn_p2", scope.clone()))
            .unwrap();
        let d2 = svc
            .grant(child_req(&d1, "prn_p2", "prn_p3", scope.clone()))
            .unwrap();
        let d3 = svc
            .grant(child_req(&d2, "prn_p3", "prn_p4", scope.clone()))
            .unwrap();
        let err = svc
            .grant(child_req(&d3, "prn_p4", "prn_p5", scope))
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::DelegationDepthExceeded);

        let events = store.read_stream(&StreamKey::workspace("ws1"), 0, 100);
        let attempted: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == "agent.delegation.attempted")
            .collect();
        assert_eq!(attempted.len(), 1);
        assert_eq!(
            attempted[0].data["denied_reason"],
            serde_json::json!("delegation_depth_exceeded")
        );
    }

    #[test]
    fn grantor_must_hold_parent() {
        let (svc, _, _) = service();
        let root = svc
            .grant(root_req(ScopeSet::new().rooms(&["r1"])))
            .unwrap();
        let err = svc
            .grant(child_req(
                &root,
                "prn_interloper",
                "prn_p2",
                ScopeSet::new().rooms(&["r1"]),
            ))
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::ParentTokenGrantorMismatch);
    }

    #[test]
    fn revoked_parent_refuses_delegation() {
        let (svc, _, _) = service();
        let root = svc
            .grant(root_req(ScopeSet::new().rooms(&["r1"])))
            .unwrap();
        svc.revoke("ws1", &root.token_id, None).unwrap();
        let err = svc
            .grant(child_req(
                &root,
                "prn_p1",
                "prn_p2",
                ScopeSet::new().rooms(&["r1"]),
            ))
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::ParentTokenRevoked);
    }

    #[test]
    fn expired_parent_refuses_delegation() {
        let (svc, _, clock) = service();
        let mut req = root_req(ScopeSet::new().rooms(&["r1"]));
        req.valid_until = Some(clock.now() + Duration::minutes(1));
        let root = svc.grant(req).unwrap();
        clock.advance(Duration::minutes(2));
        let err = svc
            .grant(child_req(
                &root,
                "prn_p1",
                "prn_p2",
                ScopeSet::new().rooms(&["r1"]),
            ))
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::ParentTokenExpired);
    }

    #[test]
    fn unknown_parent_refuses_delegation() {
        let (svc, _, _) = service();
        let err = svc
            .grant(GrantRequest {
                workspace_id: "ws1".into(),
                issued_to_principal_id: "prn_p2".into(),
                granted_by_principal_id: "prn_p1".into(),
                parent_token_id: Some("cap_missing".into()),
                requested_scopes: ScopeSet::new().rooms(&["r1"]),
                valid_until: None,
            })
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::ParentTokenNotFound);
    }

    #[test]
    fn parent_in_other_workspace_is_not_found() {
        let (svc, _, _) = service();
        let root = svc
            .grant(root_req(ScopeSet::new().rooms(&["r1"])))
            .unwrap();
        let mut req = child_req(&root, "prn_p1", "prn_p2", ScopeSet::new().rooms(&["r1"]));
        req.workspace_id = "ws2".into();
        let err = svc.grant(req).unwrap_err();
        assert_eq!(err.code, ReasonCode::ParentTokenNotFound);
    }

    // -- revoke -----------------------------------------------------------

    #[test]
    fn revoke_is_idempotent() {
        let (svc, store, _) = service();
        let root = svc
            .grant(root_req(ScopeSet::new().rooms(&["r1"])))
            .unwrap();
        let first = svc.revoke("ws1", &root.token_id, Some("rotation")).unwrap();
        assert!(!first.already_revoked);
        let second = svc.revoke("ws1", &root.token_id, None).unwrap();
        assert!(second.already_revoked);
        let events = store.read_stream(&StreamKey::workspace("ws1"), 0, 100);
        let revoked: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == "agent.capability.revoked")
            .collect();
        assert_eq!(revoked.len(), 1);
    }

    #[test]
    fn revoke_unknown_token() {
        let (svc, _, _) = service();
        let err = svc.revoke("ws1", "cap_missing", None).unwrap_err();
        assert_eq!(err.code, ReasonCode::TokenNotFound);
    }

    // -- chain validity ---------------------------------------------------

    #[test]
    fn revocation_does_not_cascade_but_chain_checks_catch_it() {
        let (svc, _, _) = service();
        let root = svc
            .grant(root_req(ScopeSet::new().rooms(&["r1"])))
            .unwrap();
        let child = svc
            .grant(child_req(
                &root,
                "prn_p1",
                "prn_p2",
                ScopeSet::new().rooms(&["r1"]),
            ))
            .unwrap();
        svc.revoke("ws1", &root.token_id, None).unwrap();
        // The child row itself is untouched…
        assert!(svc.get(&child.token_id).unwrap().revoked_at.is_none());
        // …but use-time chain validation fails.
        assert!(!svc.chain_valid(&child.token_id));
    }

    #[test]
    fn chain_valid_for_intact_chain() {
        let (svc, _, _) = service();
        let root = svc
            .grant(root_req(ScopeSet::new().rooms(&["r1"])))
            .unwrap();
        let child = svc
            .grant(child_req(
                &root,
                "prn_p1",
                "prn_p2",
                ScopeSet::new().rooms(&["r1"]),
            ))
            .unwrap();
        assert!(svc.chain_valid(&child.token_id));
    }
}
