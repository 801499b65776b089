// SPDX-License-Identifier: MIT OR Apache-2.0

//! The ordered intake protocol for `message.created`.

use std::fmt;
use std::sync::Arc;

use ocp_core::{Actor, EventDraft, EventEnvelope, StreamKey, event_types, ids};
use ocp_error::{CoreError, ReasonCode};
use ocp_lease::{LeaseError, LeaseManager, LeaseVerdict, RowLock};
use ocp_projection::ProjectionEngine;
use ocp_ratelimit::{BucketKey, RateLimiter};
use ocp_store::{AppendError, EventStore};
use serde_json::{Value, json};

use crate::message::{
    MessageAccepted, MessageIntent, MessageRequest, RequestIdentity, WorkTarget, validate_shape,
};
use crate::probe::{ArtifactProbe, ArtifactProbeOutcome};
use crate::registry::Registry;

/// Rate-limit scope consumed by every message write.
pub const MESSAGE_SCOPE: &str = "messages";

/// Orchestrates the ten-step intake protocol. Clones share state.
#[derive(Clone)]
pub struct MessageIntake {
    store: EventStore,
    projections: ProjectionEngine,
    leases: LeaseManager,
    limiter: RateLimiter,
    registry: Registry,
    probe: Arc<dyn ArtifactProbe>,
}

impl fmt::Debug for MessageIntake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageIntake").finish_non_exhaustive()
    }
}

impl MessageIntake {
    /// Assemble the pipeline.
    #[must_use]
    pub fn new(
        store: EventStore,
        projections: ProjectionEngine,
        leases: LeaseManager,
        limiter: RateLimiter,
        registry: Registry,
        probe: Arc<dyn ArtifactProbe>,
    ) -> Self {
        Self {
            store,
            projections,
            leases,
            limiter,
            registry,
            probe,
        }
    }

    /// Accept a message write.
    ///
    /// The protocol aborts on the first failed step and reports its reason
    /// code. An idempotent replay by the same agent is a success carrying
    /// `duplicate_idempotent_replay`; the same key from another agent is a
    /// conflict. A committed write on a leased work item implies the
    /// caller held a live lease at append time, or the result's
    /// `lease_warning` flag is set.
    ///
    /// # Errors
    ///
    /// A [`CoreError`] per the intake reason-code table.
    pub async fn submit(
        &self,
        identity: &RequestIdentity,
        req: MessageRequest,
    ) -> Result<MessageAccepted, CoreError> {
        // 1. Schema and shape.
        let target = validate_shape(&req)?;

        // 2. Identity: the principal must own the claimed agent.
        let agent = self
            .registry
            .agent_by_principal(&identity.principal_id)
            .filter(|a| a.workspace_id == identity.workspace_id)
            .ok_or_else(|| {
                CoreError::new(ReasonCode::UnknownAgent, "principal does not map to an agent")
            })?;
        if agent.agent_id != req.from_agent_id {
            return Err(CoreError::new(
                ReasonCode::UnknownAgent,
                "from_agent_id does not match the authenticated principal",
            )
            .with_detail("from_agent_id", &req.from_agent_id));
        }

        // 3. Cross-entity checks.
        self.check_entities(identity, &req)?;

        // 4. Artifact existence, only for payload_ref writes.
        if let Some(payload_ref) = &req.payload_ref {
            match self.probe.head(&payload_ref.object_key).await {
                ArtifactProbeOutcome::Exists => {}
                ArtifactProbeOutcome::NotFound => {
                    return Err(CoreError::new(
                        ReasonCode::ArtifactNotFound,
                        "referenced artifact does not exist",
                    )
                    .with_detail("object_key", &payload_ref.object_key));
                }
                ArtifactProbeOutcome::Unavailable => {
                    return Err(CoreError::new(
                        ReasonCode::StorageUnavailable,
                        "artifact storage could not be reached",
                    ));
                }
            }
        }

        // 5. Pre-transaction idempotency probe.
        if let Some(existing) = self.store.find_by_idempotency(
            &identity.workspace_id,
            event_types::MESSAGE_CREATED,
            &req.idempotency_key,
        ) {
            return self.resolve_replay(&existing, &req);
        }

        // 6. Rate limit. Denials never consume idempotency keys: nothing
        // has been written yet.
        let bucket = BucketKey {
            workspace_id: identity.workspace_id.clone(),
            agent_id: agent.agent_id.clone(),
            scope: MESSAGE_SCOPE.to_string(),
            intent: req.intent.as_str().to_string(),
            experiment_id: req
                .work_links
                .as_ref()
                .and_then(|links| links.experiment_id.clone()),
        };
        if let Err(denied) = self.limiter.consume(&bucket) {
            let code = if req.intent == MessageIntent::Heartbeat {
                ReasonCode::HeartbeatRateLimited
            } else {
                ReasonCode::RateLimited
            };
            return Err(CoreError::new(code, "message rate limit exhausted")
                .with_detail("consecutive_429", denied.consecutive_429));
        }

        // 7. Lease verify under a NOWAIT row lock, held across the append.
        let mut lease_warning = false;
        let row_lock = self.lock_lease(identity, &req, target.as_ref(), &mut lease_warning)?;

        // 8. Append.
        let message_id = ids::message_id();
        let draft = self.build_draft(identity, &agent.agent_id, &message_id, &req);
        let event = match self.store.append(draft) {
            Ok(event) => event,
            Err(AppendError::IdempotencyUniqueViolation { .. }) => {
                // Lost the race; a second probe resolves it.
                drop(row_lock);
                let existing = self
                    .store
                    .find_by_idempotency(
                        &identity.workspace_id,
                        event_types::MESSAGE_CREATED,
                        &req.idempotency_key,
                    )
                    .ok_or_else(|| {
                        CoreError::new(ReasonCode::InternalError, "idempotency row vanished")
                    })?;
                return self.resolve_replay(&existing, &req);
            }
            Err(err) => {
                return Err(
                    CoreError::new(ReasonCode::InternalError, "event append failed")
                        .with_source(err),
                );
            }
        };

        // 9. Terminal intents delete the lease row in the same guarded
        // section.
        if let Some(lock) = row_lock {
            if req.intent.is_terminal() {
                lock.delete();
            }
            drop(lock);
        }

        // 10. Projectors run after the append commits; a failure parks in
        // the DLQ and surfaces as internal_error, but the event stands.
        if self.projections.apply(&event).is_err() {
            return Err(CoreError::new(
                ReasonCode::InternalError,
                "projection failed; event parked for re-projection",
            )
            .with_detail("event_id", &event.event_id));
        }

        // Successful commit resets the consecutive-429 streak off the
        // request path.
        let limiter = self.limiter.clone();
        let streak_key = bucket.streak_key();
        tokio::spawn(async move {
            limiter.reset_streak(&streak_key);
        });

        tracing::info!(
            message_id,
            event_id = %event.event_id,
            agent_id = %agent.agent_id,
            intent = req.intent.as_str(),
            lease_warning,
            "message accepted"
        );
        Ok(MessageAccepted {
            message_id,
            event_id: event.event_id,
            idempotent_replay: false,
            reason_code: None,
            lease_warning,
        })
    }

    fn check_entities(
        &self,
        identity: &RequestIdentity,
        req: &MessageRequest,
    ) -> Result<(), CoreError> {
        if let Some(room_id) = &req.room_id {
            let room = self.registry.room(room_id).ok_or_else(|| {
                CoreError::new(ReasonCode::RoomNotFound, "no such room")
                    .with_detail("room_id", room_id)
            })?;
            if room.workspace_id != identity.workspace_id {
                return Err(CoreError::new(
                    ReasonCode::UnauthorizedWorkspace,
                    "room belongs to a different workspace",
                ));
            }
        }
        if let Some(thread_id) = &req.thread_id {
            let thread = self.registry.thread(thread_id).ok_or_else(|| {
                CoreError::new(ReasonCode::ThreadNotFound, "no such thread")
                    .with_detail("thread_id", thread_id)
            })?;
            if thread.workspace_id != identity.workspace_id {
                return Err(CoreError::new(
                    ReasonCode::UnauthorizedWorkspace,
                    "thread belongs to a different workspace",
                ));
            }
            if let Some(room_id) = &req.room_id {
                if &thread.room_id != room_id {
                    return Err(CoreError::new(
                        ReasonCode::InvalidPayloadCombination,
                        "thread does not belong to the given room",
                    )
                    .with_detail("thread_id", thread_id)
                    .with_detail("room_id", room_id));
                }
            }
        }
        Ok(())
    }

    /// Take the row lock NOWAIT and verify the lease. Lock contention
    /// reports `heartbeat_rate_limited`, a stopgap mapping until a
    /// dedicated contention code exists.
    fn lock_lease(
        &self,
        identity: &RequestIdentity,
        req: &MessageRequest,
        target: Option<&WorkTarget>,
        lease_warning: &mut bool,
    ) -> Result<Option<RowLock>, CoreError> {
        if req.intent == MessageIntent::Heartbeat {
            return Ok(None);
        }
        let Some(key) = target.and_then(|t| t.lease_key(&identity.workspace_id)) else {
            return Ok(None);
        };
        let lock = match self.leases.try_lock_row(key) {
            Ok(lock) => lock,
            Err(LeaseError::LockUnavailable) => {
                return Err(CoreError::new(
                    ReasonCode::HeartbeatRateLimited,
                    "lease row is contended, retry shortly",
                ));
            }
            Err(err) => {
                return Err(
                    CoreError::new(ReasonCode::InternalError, "lease lock failed").with_source(err),
                );
            }
        };
        match lock.verify(&req.from_agent_id) {
            LeaseVerdict::Held { .. } => Ok(Some(lock)),
            LeaseVerdict::Missing => {
                *lease_warning = true;
                Ok(Some(lock))
            }
            LeaseVerdict::Preempted => Err(CoreError::new(
                ReasonCode::LeaseExpiredOrPreempted,
                "lease is held by another agent or expired",
            )),
        }
    }

    fn build_draft(
        &self,
        identity: &RequestIdentity,
        agent_id: &str,
        message_id: &str,
        req: &MessageRequest,
    ) -> EventDraft {
        let stream = if let Some(room_id) = &req.room_id {
            StreamKey::room(room_id)
        } else if let Some(thread_id) = &req.thread_id {
            StreamKey::thread(thread_id)
        } else {
            StreamKey::workspace(&identity.workspace_id)
        };

        let mut data = json!({
            "message_id": message_id,
            "from_agent_id": agent_id,
            "intent": req.intent.as_str(),
        });
        if let Some(payload) = &req.payload {
            data["payload"] = payload.clone();
        }
        if let Some(payload_ref) = &req.payload_ref {
            data["payload_ref"] = json!(payload_ref);
        }
        if let Some(links) = &req.work_links {
            data["work_links"] = json!(links);
        }

        let mut draft = EventDraft::new(
            event_types::MESSAGE_CREATED,
            &identity.workspace_id,
            Actor::agent(agent_id),
        )
        .principal(&identity.principal_id)
        .stream(stream)
        .data(data)
        .idempotency_key(&req.idempotency_key);
        if let Some(room_id) = &req.room_id {
            draft = draft.room(room_id);
        }
        if let Some(thread_id) = &req.thread_id {
            draft = draft.thread(thread_id);
        }
        if let Some(correlation_id) = &req.correlation_id {
            draft = draft.correlation(correlation_id);
        }
        if let Some(run_id) = req.work_links.as_ref().and_then(|l| l.run_id.clone()) {
            draft = draft.run(run_id);
        }
        draft
    }

    /// Resolve a duplicate idempotency key against the committed event.
    fn resolve_replay(
        &self,
        existing: &EventEnvelope,
        req: &MessageRequest,
    ) -> Result<MessageAccepted, CoreError> {
        let committed_agent = existing
            .data
            .get("from_agent_id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if committed_agent == req.from_agent_id {
            let message_id = existing
                .data
                .get("message_id")
                .and_then(Value::as_str)
                .unwrap_or(&existing.event_id)
                .to_string();
            return Ok(MessageAccepted {
                message_id,
                event_id: existing.event_id.clone(),
                idempotent_replay: true,
                reason_code: Some(ReasonCode::DuplicateIdempotentReplay),
                lease_warning: false,
            });
        }
        Err(CoreError::new(
            ReasonCode::IdempotencyConflictUnresolved,
            "idempotency key was committed by a different agent",
        )
        .with_detail("idempotency_key", &req.idempotency_key))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{PayloadRef, WorkLinks};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use ocp_core::ManualClock;
    use ocp_lease::{LeaseKey, WorkItemType};
    use ocp_ratelimit::RateLimitSettings;
    use ocp_store::DeadLetterQueue;
    use serde_json::json;
    use std::sync::Arc;

    struct StaticProbe(ArtifactProbeOutcome);

    #[async_trait]
    impl ArtifactProbe for StaticProbe {
        async fn head(&self, _object_key: &str) -> ArtifactProbeOutcome {
            self.0
        }
    }

    struct Harness {
        intake: MessageIntake,
        store: EventStore,
        leases: LeaseManager,
        limiter: RateLimiter,
        clock: ManualClock,
    }

    fn harness_with(probe: ArtifactProbeOutcome, burst: u32) -> Harness {
        let clock = ManualClock::at(Utc::now());
        let shared: ocp_core::SharedClock = Arc::new(clock.clone());
        let store = EventStore::new(shared.clone());
        let projections = ProjectionEngine::new(DeadLetterQueue::new());
        let leases = LeaseManager::new(shared.clone());
        let limiter = RateLimiter::new(
            RateLimitSettings {
                burst,
                window_secs: 3600,
            },
            shared,
        );
        let registry = Registry::new();
        registry.register_agent("ws1", "ag_a", "prn_a");
        registry.register_agent("ws1", "ag_b", "prn_b");
        registry.register_room("ws1", "r1");
        registry.register_thread("ws1", "r1", "th1");
        registry.register_room("ws2", "r_other");

        let intake = MessageIntake::new(
            store.clone(),
            projections,
            leases.clone(),
            limiter.clone(),
            registry,
            Arc::new(StaticProbe(probe)),
        );
        Harness {
            intake,
            store,
            leases,
            limiter,
            clock,
        }
    }

    fn harness() -> Harness {
        harness_with(ArtifactProbeOutcome::Exists, 100)
    }

    fn identity(principal: &str) -> RequestIdentity {
        RequestIdentity {
            workspace_id: "ws1".into(),
            principal_id: principal.into(),
        }
    }

    fn request(agent: &str, key: &str) -> MessageRequest {
        MessageRequest {
            schema_version: 1,
            from_agent_id: agent.into(),
            room_id: Some("r1".into()),
            thread_id: None,
            correlation_id: None,
            intent: MessageIntent::Message,
            idempotency_key: key.into(),
            payload: Some(json!({"text": "hello"})),
            payload_ref: None,
            work_links: None,
        }
    }

    // -- idempotency ------------------------------------------------------

    #[tokio::test]
    async fn idempotent_replay_by_same_agent() {
        let h = harness();
        let first = h
            .intake
            .submit(&identity("prn_a"), request("ag_a", "K1"))
            .await
            .unwrap();
        assert!(!first.idempotent_replay);

        let replay = h
            .intake
            .submit(&identity("prn_a"), request("ag_a", "K1"))
            .await
            .unwrap();
        assert!(replay.idempotent_replay);
        assert_eq!(replay.message_id, first.message_id);
        assert_eq!(
            replay.reason_code,
            Some(ReasonCode::DuplicateIdempotentReplay)
        );

        // Exactly one committed message.created.
        let events = h.store.read_stream(&StreamKey::room("r1"), 0, 100);
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn idempotency_conflict_across_agents() {
        let h = harness();
        h.intake
            .submit(&identity("prn_a"), request("ag_a", "K2"))
            .await
            .unwrap();
        let err = h
            .intake
            .submit(&identity("prn_b"), request("ag_b", "K2"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::IdempotencyConflictUnresolved);
        assert_eq!(err.http_status(), 409);
    }

    // -- identity ---------------------------------------------------------

    #[tokio::test]
    async fn unknown_principal_is_refused() {
        let h = harness();
        let err = h
            .intake
            .submit(&identity("prn_ghost"), request("ag_a", "K1"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::UnknownAgent);
    }

    #[tokio::test]
    async fn from_agent_must_match_principal() {
        let h = harness();
        let err = h
            .intake
            .submit(&identity("prn_a"), request("ag_b", "K1"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::UnknownAgent);
    }

    // -- cross-entity -----------------------------------------------------

    #[tokio::test]
    async fn foreign_room_is_unauthorized() {
        let h = harness();
        let mut req = request("ag_a", "K1");
        req.room_id = Some("r_other".into());
        let err = h.intake.submit(&identity("prn_a"), req).await.unwrap_err();
        assert_eq!(err.code, ReasonCode::UnauthorizedWorkspace);
    }

    #[tokio::test]
    async fn unknown_room_and_thread() {
        let h = harness();
        let mut req = request("ag_a", "K1");
        req.room_id = Some("r_missing".into());
        let err = h.intake.submit(&identity("prn_a"), req).await.unwrap_err();
        assert_eq!(err.code, ReasonCode::RoomNotFound);

        let mut req = request("ag_a", "K1");
        req.thread_id = Some("th_missing".into());
        let err = h.intake.submit(&identity("prn_a"), req).await.unwrap_err();
        assert_eq!(err.code, ReasonCode::ThreadNotFound);
    }

    // -- artifact probe ---------------------------------------------------

    #[tokio::test]
    async fn artifact_not_found_and_unavailable() {
        for (outcome, code) in [
            (ArtifactProbeOutcome::NotFound, ReasonCode::ArtifactNotFound),
            (
                ArtifactProbeOutcome::Unavailable,
                ReasonCode::StorageUnavailable,
            ),
        ] {
            let h = harness_with(outcome, 100);
            let mut req = request("ag_a", "K1");
            req.payload = None;
            req.payload_ref = Some(PayloadRef {
                object_key: "a/b".into(),
            });
            let err = h.intake.submit(&identity("prn_a"), req).await.unwrap_err();
            assert_eq!(err.code, code);
        }
    }

    // -- rate limiting ----------------------------------------------------

    #[tokio::test]
    async fn rate_limit_denies_without_consuming_keys() {
        let h = harness_with(ArtifactProbeOutcome::Exists, 1);
        h.intake
            .submit(&identity("prn_a"), request("ag_a", "K1"))
            .await
            .unwrap();
        let err = h
            .intake
            .submit(&identity("prn_a"), request("ag_a", "K_next"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::RateLimited);
        // The denied key was not consumed: a later retry with it commits.
        h.clock.advance(Duration::hours(2));
        let ok = h
            .intake
            .submit(&identity("prn_a"), request("ag_a", "K_next"))
            .await
            .unwrap();
        assert!(!ok.idempotent_replay);
    }

    #[tokio::test]
    async fn heartbeat_denial_uses_heartbeat_code() {
        let h = harness_with(ArtifactProbeOutcome::Exists, 1);
        let mut hb = request("ag_a", "K_hb1");
        hb.intent = MessageIntent::Heartbeat;
        h.intake.submit(&identity("prn_a"), hb).await.unwrap();
        let mut hb = request("ag_a", "K_hb2");
        hb.intent = MessageIntent::Heartbeat;
        let err = h.intake.submit(&identity("prn_a"), hb).await.unwrap_err();
        assert_eq!(err.code, ReasonCode::HeartbeatRateLimited);
    }

    #[tokio::test]
    async fn successful_commit_resets_streak() {
        let h = harness_with(ArtifactProbeOutcome::Exists, 2);
        h.intake
            .submit(&identity("prn_a"), request("ag_a", "K1"))
            .await
            .unwrap();
        h.intake
            .submit(&identity("prn_a"), request("ag_a", "K2"))
            .await
            .unwrap();
        // Bucket exhausted twice.
        for key in ["K3", "K4"] {
            h.intake
                .submit(&identity("prn_a"), request("ag_a", key))
                .await
                .unwrap_err();
        }
        let streak_key = BucketKey {
            workspace_id: "ws1".into(),
            agent_id: "ag_a".into(),
            scope: MESSAGE_SCOPE.into(),
            intent: "message".into(),
            experiment_id: None,
        }
        .streak_key();
        assert_eq!(h.limiter.streak(&streak_key), 2);

        h.clock.advance(Duration::hours(2));
        h.intake
            .submit(&identity("prn_a"), request("ag_a", "K5"))
            .await
            .unwrap();
        // The reset runs off the request path.
        tokio::task::yield_now().await;
        assert_eq!(h.limiter.streak(&streak_key), 0);
    }

    // -- leases -----------------------------------------------------------

    fn approval_request(agent: &str, key: &str, approval: &str) -> MessageRequest {
        let mut req = request(agent, key);
        req.work_links = Some(WorkLinks {
            approval_id: Some(approval.into()),
            ..WorkLinks::default()
        });
        req
    }

    #[tokio::test]
    async fn foreign_live_lease_preempts() {
        let h = harness();
        h.leases
            .acquire(
                LeaseKey::new("ws1", WorkItemType::Approval, "ap1"),
                "ag_a",
                Duration::minutes(5),
            )
            .unwrap();
        let err = h
            .intake
            .submit(&identity("prn_b"), approval_request("ag_b", "K1", "ap1"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::LeaseExpiredOrPreempted);
        assert_eq!(err.http_status(), 403);
    }

    #[tokio::test]
    async fn holder_resolve_commits_and_deletes_lease() {
        let h = harness();
        let key = LeaseKey::new("ws1", WorkItemType::Approval, "ap1");
        h.leases
            .acquire(key.clone(), "ag_a", Duration::minutes(5))
            .unwrap();
        let mut req = approval_request("ag_a", "K1", "ap1");
        req.intent = MessageIntent::Resolve;
        let accepted = h.intake.submit(&identity("prn_a"), req).await.unwrap();
        assert!(!accepted.lease_warning);
        assert!(h.leases.peek(&key).is_none());
    }

    #[tokio::test]
    async fn expired_lease_is_preempted_even_for_holder() {
        let h = harness();
        h.leases
            .acquire(
                LeaseKey::new("ws1", WorkItemType::Approval, "ap1"),
                "ag_a",
                Duration::minutes(5),
            )
            .unwrap();
        h.clock.advance(Duration::minutes(6));
        let err = h
            .intake
            .submit(&identity("prn_a"), approval_request("ag_a", "K1", "ap1"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::LeaseExpiredOrPreempted);
    }

    #[tokio::test]
    async fn missing_lease_commits_with_warning() {
        let h = harness();
        let accepted = h
            .intake
            .submit(&identity("prn_a"), approval_request("ag_a", "K1", "ap_new"))
            .await
            .unwrap();
        assert!(accepted.lease_warning);
        assert!(!accepted.idempotent_replay);
    }

    #[tokio::test]
    async fn contended_lease_lock_reports_heartbeat_rate_limited() {
        let h = harness();
        let _held = h
            .leases
            .try_lock_row(LeaseKey::new("ws1", WorkItemType::Approval, "ap1"))
            .unwrap();
        let err = h
            .intake
            .submit(&identity("prn_a"), approval_request("ag_a", "K1", "ap1"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::HeartbeatRateLimited);
        assert_eq!(err.http_status(), 429);
    }

    // -- stream routing ---------------------------------------------------

    #[tokio::test]
    async fn message_lands_on_room_stream() {
        let h = harness();
        h.intake
            .submit(&identity("prn_a"), request("ag_a", "K1"))
            .await
            .unwrap();
        let events = h.store.read_stream(&StreamKey::room("r1"), 0, 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "message.created");
        assert_eq!(events[0].data["intent"], json!("message"));
        assert_eq!(events[0].actor.actor_id, "ag_a");
    }

    #[tokio::test]
    async fn workspace_stream_when_no_room() {
        let h = harness();
        let mut req = request("ag_a", "K1");
        req.room_id = None;
        h.intake.submit(&identity("prn_a"), req).await.unwrap();
        let events = h
            .store
            .read_stream(&StreamKey::workspace("ws1"), 0, 10);
        assert_eq!(events.len(), 1);
    }
}
