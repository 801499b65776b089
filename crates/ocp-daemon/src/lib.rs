// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! HTTP adapter for the ops control plane kernel.
//!
//! Routes are thin translators: headers become a request identity, bodies
//! become typed component calls, and component errors become the uniform
//! `{error, reason_code, reason, details}` body with the reason code's
//! fixed status. No policy lives here.

pub mod auth;

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path as AxPath, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use ocp_capability::{
    CapabilityService, GrantRequest, PrincipalRegistry, PrincipalType, ScopeSet,
};
use ocp_core::{Actor, SharedClock, StreamKey, StreamType, system_clock};
use ocp_error::{CoreError, ErrorBody, ReasonCode};
use ocp_intake::{
    HttpArtifactProbe, MessageIntake, MessageRequest, NullArtifactProbe, Registry, close_incident,
};
use ocp_lease::LeaseManager;
use ocp_projection::{PipelineView, ProjectionEngine, pipeline_view};
use ocp_ratelimit::{RateLimitSettings, RateLimiter};
use ocp_secrets::{MasterKey, SecretVault};
use ocp_store::{DeadLetterQueue, EventStore, VerifyReport};
use ocp_stream::StreamTail;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use auth::{SessionStore, request_identity};

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Everything the routes need, assembled once at startup.
#[derive(Clone)]
pub struct AppState {
    /// The event log.
    pub store: EventStore,
    /// Read models.
    pub projections: ProjectionEngine,
    /// Message intake pipeline.
    pub intake: MessageIntake,
    /// Capability service.
    pub capabilities: CapabilityService,
    /// Principal table.
    pub principals: PrincipalRegistry,
    /// Agent/room/thread registry.
    pub registry: Registry,
    /// Lease table.
    pub leases: LeaseManager,
    /// Secret vault.
    pub vault: SecretVault,
    /// Room tail factory.
    pub tail: StreamTail,
    /// Bearer sessions.
    pub sessions: SessionStore,
    /// Clock shared across components.
    pub clock: SharedClock,
}

impl AppState {
    /// Assemble the kernel from configuration.
    pub fn from_config(config: &ocp_config::CoreConfig) -> anyhow::Result<Self> {
        let clock = system_clock();
        let store = EventStore::new(clock.clone());
        let dlq = DeadLetterQueue::new();
        let projections = ProjectionEngine::new(dlq);
        let leases = LeaseManager::new(clock.clone());
        let limiter = RateLimiter::new(
            RateLimitSettings {
                burst: config.rate_limit_messages.burst,
                window_secs: config.rate_limit_messages.window_secs,
            },
            clock.clone(),
        );
        let registry = Registry::new();
        let principals = PrincipalRegistry::new(clock.clone());
        let capabilities = CapabilityService::new(store.clone(), clock.clone());

        let probe: Arc<dyn ocp_intake::ArtifactProbe> = match &config.artifact_head_url {
            Some(url) => Arc::new(HttpArtifactProbe::new(url.clone())),
            None => Arc::new(NullArtifactProbe),
        };
        let intake = MessageIntake::new(
            store.clone(),
            projections.clone(),
            leases.clone(),
            limiter,
            registry.clone(),
            probe,
        );

        let master = config
            .secrets_master_key
            .as_deref()
            .map(MasterKey::from_hex)
            .transpose()
            .map_err(|err| anyhow::anyhow!("SECRETS_MASTER_KEY invalid: {err}"))?;
        let vault = SecretVault::new(master, principals.clone(), store.clone(), clock.clone());

        Ok(Self {
            tail: StreamTail::new(store.clone()),
            sessions: SessionStore::new(clock.clone()),
            store,
            projections,
            intake,
            capabilities,
            principals,
            registry,
            leases,
            vault,
            clock,
        })
    }
}

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// Wire-facing error: a [`CoreError`] plus its fixed status.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the router over assembled state.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        .route("/v1/messages", post(cmd_post_message))
        .route("/v1/capabilities", post(cmd_grant_capability))
        .route("/v1/capabilities/{token_id}/revoke", post(cmd_revoke_capability))
        .route("/v1/pipeline", get(cmd_pipeline))
        .route("/v1/rooms/{room_id}/events/stream", get(cmd_room_stream))
        .route("/v1/secrets", post(cmd_put_secret))
        .route("/v1/secrets/{secret_id}/access", post(cmd_access_secret))
        .route("/v1/incidents/{incident_id}/close", post(cmd_close_incident))
        .route(
            "/v1/audit/{stream_type}/{stream_id}/verify",
            get(cmd_verify_stream),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn cmd_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "contract_version": ocp_core::CONTRACT_VERSION,
        "events": state.store.len(),
        "time": state.clock.now().to_rfc3339(),
    }))
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MessageResponse {
    message_id: String,
    idempotent_replay: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason_code: Option<ReasonCode>,
}

async fn cmd_post_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<MessageRequest>,
) -> Result<Response, ApiError> {
    let identity = request_identity(&state.sessions, &headers)?;
    let accepted = state.intake.submit(&identity, body).await?;

    let status = if accepted.idempotent_replay {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let mut response = (
        status,
        Json(MessageResponse {
            message_id: accepted.message_id,
            idempotent_replay: accepted.idempotent_replay,
            reason_code: accepted.reason_code,
        }),
    )
        .into_response();
    if accepted.lease_warning {
        response
            .headers_mut()
            .insert("x-lease-warning", HeaderValue::from_static("missing_lease"));
    }
    Ok(response)
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GrantBody {
    issued_to_principal_id: String,
    #[serde(default)]
    parent_token_id: Option<String>,
    #[serde(default)]
    scopes: ScopeSet,
    #[serde(default)]
    valid_until: Option<DateTime<Utc>>,
}

async fn cmd_grant_capability(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<GrantBody>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = request_identity(&state.sessions, &headers)?;
    let token = state.capabilities.grant(GrantRequest {
        workspace_id: identity.workspace_id,
        issued_to_principal_id: body.issued_to_principal_id,
        granted_by_principal_id: identity.principal_id,
        parent_token_id: body.parent_token_id,
        requested_scopes: body.scopes,
        valid_until: body.valid_until,
    })?;
    Ok((StatusCode::CREATED, Json(token)))
}

#[derive(Debug, Deserialize, Default)]
struct RevokeBody {
    #[serde(default)]
    reason: Option<String>,
}

async fn cmd_revoke_capability(
    State(state): State<Arc<AppState>>,
    AxPath(token_id): AxPath<String>,
    headers: HeaderMap,
    body: Option<Json<RevokeBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = request_identity(&state.sessions, &headers)?;
    let reason = body.and_then(|Json(b)| b.reason);
    let outcome = state
        .capabilities
        .revoke(&identity.workspace_id, &token_id, reason.as_deref())?;
    Ok(Json(outcome))
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PipelineQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn cmd_pipeline(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<PipelineQuery>,
) -> Result<Json<PipelineView>, ApiError> {
    let identity = request_identity(&state.sessions, &headers)?;
    let view = state
        .projections
        .with_state(|s| pipeline_view(s, &identity.workspace_id, query.limit));
    Ok(Json(view))
}

// ---------------------------------------------------------------------------
// Stream tail
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StreamQuery {
    #[serde(default)]
    from_seq: Option<i64>,
}

async fn cmd_room_stream(
    State(state): State<Arc<AppState>>,
    AxPath(room_id): AxPath<String>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    let _identity = request_identity(&state.sessions, &headers)?;
    let subscription = state
        .tail
        .subscribe(StreamKey::room(room_id), query.from_seq.unwrap_or(0));

    let stream = ReceiverStream::new(subscription.into_receiver())
        .flat_map(futures::stream::iter)
        .map(|event| {
            Ok::<SseEvent, Infallible>(
                SseEvent::default().data(
                    serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string()),
                ),
            )
        });
    let sse = Sse::new(stream).keep_alive(KeepAlive::default());

    let mut response = sse.into_response();
    let headers = response.headers_mut();
    headers.insert(
        "cache-control",
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    Ok(response)
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PutSecretBody {
    secret_name: String,
    value: String,
}

async fn cmd_put_secret(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PutSecretBody>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = request_identity(&state.sessions, &headers)?;
    let row = state.vault.put(
        &identity.workspace_id,
        &body.secret_name,
        body.value.as_bytes(),
        &identity.principal_id,
    )?;
    // Ciphertext stays inside the vault; only metadata leaves.
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "secret_id": row.secret_id,
            "secret_name": row.secret_name,
            "algorithm": row.algorithm,
            "created_at": row.created_at,
        })),
    ))
}

async fn cmd_access_secret(
    State(state): State<Arc<AppState>>,
    AxPath(secret_id): AxPath<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = request_identity(&state.sessions, &headers)?;
    let plaintext = state
        .vault
        .access(&identity.workspace_id, &secret_id, &identity.principal_id)?;
    let value = String::from_utf8(plaintext).map_err(|_| {
        CoreError::new(ReasonCode::InternalError, "secret is not valid UTF-8")
    })?;
    Ok(Json(json!({ "secret_id": secret_id, "value": value })))
}

// ---------------------------------------------------------------------------
// Incidents
// ---------------------------------------------------------------------------

async fn cmd_close_incident(
    State(state): State<Arc<AppState>>,
    AxPath(incident_id): AxPath<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = request_identity(&state.sessions, &headers)?;
    let actor = match state.principals.get(&identity.principal_id) {
        Some(p) => Actor {
            actor_type: p.principal_type.into(),
            actor_id: identity.principal_id.clone(),
        },
        None => Actor::service(identity.principal_id.clone()),
    };
    let outcome = close_incident(
        &state.store,
        &state.projections,
        &identity.workspace_id,
        &incident_id,
        actor,
        Some(&identity.principal_id),
    )?;
    Ok(Json(outcome))
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct VerifyQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn cmd_verify_stream(
    State(state): State<Arc<AppState>>,
    AxPath((stream_type, stream_id)): AxPath<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<VerifyReport>, ApiError> {
    let _identity = request_identity(&state.sessions, &headers)?;
    let stream_type = StreamType::parse(&stream_type).ok_or_else(|| {
        CoreError::new(ReasonCode::MissingField, "unknown stream type")
            .with_detail("stream_type", &stream_type)
    })?;
    let key = StreamKey {
        stream_type,
        stream_id,
    };
    let report = state.store.verify_stream(&key, query.limit.unwrap_or(1000));
    if !report.valid {
        warn!(
            stream_id = %key.stream_id,
            checked = report.checked,
            "audit verification found a chain mismatch"
        );
    }
    Ok(Json(report))
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

/// Seed an owner principal and session for a workspace, in the manner of
/// the out-of-scope bootstrap flow: enough to make a fresh process usable.
pub fn bootstrap_workspace(
    state: &AppState,
    workspace_id: &str,
    bootstrap_token: Option<&str>,
) -> auth::Session {
    let owner = state.principals.register(PrincipalType::User);
    let session = match bootstrap_token {
        Some(token) => state.sessions.issue_with_token(
            workspace_id,
            &owner.principal_id,
            token.to_string(),
        ),
        None => state.sessions.issue(workspace_id, &owner.principal_id),
    };
    info!(workspace_id, principal_id = %owner.principal_id, "workspace bootstrapped");
    session
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use ocp_config::CoreConfig;
    use tower::ServiceExt;

    struct TestApp {
        app: Router,
        state: Arc<AppState>,
        token: String,
    }

    async fn test_app() -> TestApp {
        let config = CoreConfig::default();
        let state = Arc::new(AppState::from_config(&config).unwrap());
        let agent_principal = state.principals.register(PrincipalType::Agent);
        state
            .registry
            .register_agent("ws1", "ag1", &agent_principal.principal_id);
        state.registry.register_room("ws1", "room1");
        let session = state
            .sessions
            .issue("ws1", &agent_principal.principal_id);
        TestApp {
            app: build_app(state.clone()),
            state,
            token: session.access_token,
        }
    }

    fn post(uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-workspace-id", "ws1");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn message_body(key: &str) -> serde_json::Value {
        json!({
            "schema_version": 1,
            "from_agent_id": "ag1",
            "room_id": "room1",
            "idempotency_key": key,
            "payload": {"text": "hello"},
        })
    }

    #[tokio::test]
    async fn message_roundtrip_and_replay_statuses() {
        let t = test_app().await;
        let response = t
            .app
            .clone()
            .oneshot(post("/v1/messages", Some(&t.token), message_body("K1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let first = body_json(response).await;
        assert_eq!(first["idempotent_replay"], json!(false));

        let response = t
            .app
            .clone()
            .oneshot(post("/v1/messages", Some(&t.token), message_body("K1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let replay = body_json(response).await;
        assert_eq!(replay["idempotent_replay"], json!(true));
        assert_eq!(replay["reason_code"], json!("duplicate_idempotent_replay"));
        assert_eq!(replay["message_id"], first["message_id"]);
    }

    #[tokio::test]
    async fn error_body_shape_is_uniform() {
        let t = test_app().await;
        // No bearer token.
        let response = t
            .app
            .clone()
            .oneshot(post("/v1/messages", None, message_body("K1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"], json!(true));
        assert_eq!(body["reason_code"], json!("missing_bearer_token"));
        assert!(body["reason"].is_string());
        assert!(body["details"].is_object());
    }

    #[tokio::test]
    async fn missing_workspace_header_is_401() {
        let t = test_app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/v1/messages")
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", t.token))
            .body(Body::from(message_body("K1").to_string()))
            .unwrap();
        let response = t.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["reason_code"], json!("missing_workspace_header"));
    }

    #[tokio::test]
    async fn lease_warning_header_is_surfaced() {
        let t = test_app().await;
        let mut body = message_body("K1");
        body["work_links"] = json!({"approval_id": "ap_unleased"});
        let response = t
            .app
            .clone()
            .oneshot(post("/v1/messages", Some(&t.token), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get("x-lease-warning").unwrap(),
            "missing_lease"
        );
    }

    #[tokio::test]
    async fn pipeline_and_audit_reads() {
        let t = test_app().await;
        t.app
            .clone()
            .oneshot(post("/v1/messages", Some(&t.token), message_body("K1")))
            .await
            .unwrap();

        let request = Request::builder()
            .uri("/v1/pipeline?limit=10")
            .header("x-workspace-id", "ws1")
            .header("authorization", format!("Bearer {}", t.token))
            .body(Body::empty())
            .unwrap();
        let response = t.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let view = body_json(response).await;
        assert!(view["stages"]["1_inbox"]["items"].as_array().unwrap().is_empty());

        let request = Request::builder()
            .uri("/v1/audit/room/room1/verify")
            .header("x-workspace-id", "ws1")
            .header("authorization", format!("Bearer {}", t.token))
            .body(Body::empty())
            .unwrap();
        let response = t.app.clone().oneshot(request).await.unwrap();
        let report = body_json(response).await;
        assert_eq!(report["valid"], json!(true));
        assert_eq!(report["checked"], json!(1));
    }

    #[tokio::test]
    async fn unconfigured_vault_returns_501() {
        let t = test_app().await;
        let response = t
            .app
            .clone()
            .oneshot(post(
                "/v1/secrets",
                Some(&t.token),
                json!({"secret_name": "tok", "value": "s"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
        let body = body_json(response).await;
        assert_eq!(body["reason_code"], json!("secrets_vault_not_configured"));
    }

    #[tokio::test]
    async fn capability_grant_and_revoke_routes() {
        let t = test_app().await;
        let issued_to = t.state.principals.register(PrincipalType::Agent);
        let response = t
            .app
            .clone()
            .oneshot(post(
                "/v1/capabilities",
                Some(&t.token),
                json!({
                    "issued_to_principal_id": issued_to.principal_id,
                    "scopes": {"rooms": ["room1"]},
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let token = body_json(response).await;
        let token_id = token["token_id"].as_str().unwrap().to_string();

        let response = t
            .app
            .clone()
            .oneshot(post(
                &format!("/v1/capabilities/{token_id}/revoke"),
                Some(&t.token),
                json!({"reason": "rotation"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let outcome = body_json(response).await;
        assert_eq!(outcome["already_revoked"], json!(false));
    }
}
