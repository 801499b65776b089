// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request identity: bearer sessions and the workspace header.
//!
//! Every write expects an `x-workspace-id` header and an authenticated
//! principal resolved from the `Authorization` bearer token. Token formats
//! and owner bootstrap live outside the kernel; this module only honors
//! the request-identity contract.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use ocp_core::{SharedClock, ids};
use ocp_error::{CoreError, ReasonCode};
use ocp_intake::RequestIdentity;

/// A bearer session bound to one principal and one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Bearer access token.
    pub access_token: String,
    /// Refresh token.
    pub refresh_token: String,
    /// Authenticated principal.
    pub principal_id: String,
    /// Workspace the session is bound to.
    pub workspace_id: String,
    /// Access token expiry.
    pub expires_at: DateTime<Utc>,
}

/// Shared session table. Clones share state.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    clock: SharedClock,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Default access-token lifetime.
    pub const DEFAULT_TTL_HOURS: i64 = 12;

    /// Empty store.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Issue a session for a principal in a workspace.
    pub fn issue(&self, workspace_id: &str, principal_id: &str) -> Session {
        self.issue_with_token(workspace_id, principal_id, ids::prefixed("tok"))
    }

    /// Issue a session with a caller-chosen access token (owner bootstrap).
    pub fn issue_with_token(
        &self,
        workspace_id: &str,
        principal_id: &str,
        access_token: String,
    ) -> Session {
        let session = Session {
            access_token: access_token.clone(),
            refresh_token: ids::prefixed("ref"),
            principal_id: principal_id.to_string(),
            workspace_id: workspace_id.to_string(),
            expires_at: self.clock.now() + Duration::hours(Self::DEFAULT_TTL_HOURS),
        };
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .insert(access_token, session.clone());
        session
    }

    /// Resolve a bearer token to a live session.
    #[must_use]
    pub fn resolve(&self, access_token: &str) -> Option<Session> {
        let now = self.clock.now();
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .get(access_token)
            .filter(|s| s.expires_at > now)
            .cloned()
    }
}

/// Resolve the request identity from headers.
///
/// # Errors
///
/// `missing_workspace_header` without `x-workspace-id`;
/// `missing_bearer_token` without a resolvable bearer session;
/// `unauthorized_workspace` when the session is bound to another
/// workspace.
pub fn request_identity(
    sessions: &SessionStore,
    headers: &HeaderMap,
) -> Result<RequestIdentity, CoreError> {
    let workspace_id = headers
        .get("x-workspace-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            CoreError::new(
                ReasonCode::MissingWorkspaceHeader,
                "x-workspace-id header is required",
            )
        })?
        .to_string();

    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            CoreError::new(
                ReasonCode::MissingBearerToken,
                "a bearer access token is required",
            )
        })?;

    let session = sessions.resolve(token).ok_or_else(|| {
        CoreError::new(
            ReasonCode::MissingBearerToken,
            "bearer token is unknown or expired",
        )
    })?;
    if session.workspace_id != workspace_id {
        return Err(CoreError::new(
            ReasonCode::UnauthorizedWorkspace,
            "session is bound to a different workspace",
        ));
    }

    Ok(RequestIdentity {
        workspace_id,
        principal_id: session.principal_id,
    })
}
