// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Token-bucket rate control.
//!
//! One bucket per `(workspace, agent, scope, intent, experiment)`; one
//! consecutive-429 streak per `(workspace, agent, scope)`. A denial bumps
//! the streak; the first successful commit after a denial resets it. The
//! streak table is last-write-wins and increments happen under the table
//! lock. Rate-limit denials never consume idempotency keys: the limiter
//! runs before the write transaction begins.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use ocp_core::SharedClock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Settings and keys
// ---------------------------------------------------------------------------

/// Bucket sizing: `burst` tokens refilled evenly over `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Maximum tokens in the bucket.
    pub burst: u32,
    /// Window over which a full refill happens.
    pub window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            burst: 60,
            window_secs: 60,
        }
    }
}

impl RateLimitSettings {
    fn refill_per_sec(&self) -> f64 {
        f64::from(self.burst) / self.window_secs as f64
    }
}

/// Full bucket identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    /// Tenant boundary.
    pub workspace_id: String,
    /// Acting agent.
    pub agent_id: String,
    /// Limit scope, e.g. `messages`.
    pub scope: String,
    /// Secondary key: intent of the write.
    pub intent: String,
    /// Secondary key: experiment, when the write is linked to one.
    pub experiment_id: Option<String>,
}

impl BucketKey {
    /// Streak identity for this bucket: streaks aggregate over intents and
    /// experiments.
    #[must_use]
    pub fn streak_key(&self) -> StreakKey {
        StreakKey {
            workspace_id: self.workspace_id.clone(),
            agent_id: self.agent_id.clone(),
            scope: self.scope.clone(),
        }
    }
}

/// Streak row identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreakKey {
    /// Tenant boundary.
    pub workspace_id: String,
    /// Acting agent.
    pub agent_id: String,
    /// Limit scope.
    pub scope: String,
}

/// A consecutive-429 streak row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streak {
    /// Number of consecutive denials since the last successful commit.
    pub consecutive_429: u32,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

/// Denial returned when the bucket is exhausted.
#[derive(Debug, Error)]
#[error("rate limit exhausted for scope {scope} (streak {consecutive_429})")]
pub struct RateLimitExceeded {
    /// Limit scope that denied.
    pub scope: String,
    /// Streak after this denial.
    pub consecutive_429: u32,
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

struct Bucket {
    tokens: f64,
    refilled_at: DateTime<Utc>,
}

/// Shared token-bucket limiter. Clones share state.
#[derive(Clone)]
pub struct RateLimiter {
    settings: RateLimitSettings,
    buckets: Arc<Mutex<HashMap<BucketKey, Bucket>>>,
    streaks: Arc<Mutex<HashMap<StreakKey, Streak>>>,
    clock: SharedClock,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter with the given sizing.
    #[must_use]
    pub fn new(settings: RateLimitSettings, clock: SharedClock) -> Self {
        Self {
            settings,
            buckets: Arc::new(Mutex::new(HashMap::new())),
            streaks: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Consume one token.
    ///
    /// # Errors
    ///
    /// [`RateLimitExceeded`] when the bucket is empty; the denial has
    /// already been counted into the streak.
    pub fn consume(&self, key: &BucketKey) -> Result<(), RateLimitExceeded> {
        let now = self.clock.now();
        let allowed = {
            let mut buckets = self.buckets.lock().expect("bucket lock poisoned");
            let bucket = buckets.entry(key.clone()).or_insert_with(|| Bucket {
                tokens: f64::from(self.settings.burst),
                refilled_at: now,
            });
            let elapsed = (now - bucket.refilled_at)
                .num_milliseconds()
                .max(0) as f64
                / 1000.0;
            bucket.tokens = (bucket.tokens + elapsed * self.settings.refill_per_sec())
                .min(f64::from(self.settings.burst));
            bucket.refilled_at = now;
            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                true
            } else {
                false
            }
        };

        if allowed {
            return Ok(());
        }

        let streak = self.bump_streak(&key.streak_key(), now);
        tracing::debug!(
            workspace_id = %key.workspace_id,
            agent_id = %key.agent_id,
            scope = %key.scope,
            consecutive_429 = streak,
            "rate limit denied"
        );
        Err(RateLimitExceeded {
            scope: key.scope.clone(),
            consecutive_429: streak,
        })
    }

    /// Reset an agent's streak to zero after a successful commit.
    pub fn reset_streak(&self, key: &StreakKey) {
        let now = self.clock.now();
        let mut streaks = self.streaks.lock().expect("streak lock poisoned");
        streaks.insert(
            key.clone(),
            Streak {
                consecutive_429: 0,
                updated_at: now,
            },
        );
    }

    /// Current streak value; zero when no row exists.
    #[must_use]
    pub fn streak(&self, key: &StreakKey) -> u32 {
        self.streaks
            .lock()
            .expect("streak lock poisoned")
            .get(key)
            .map_or(0, |s| s.consecutive_429)
    }

    fn bump_streak(&self, key: &StreakKey, now: DateTime<Utc>) -> u32 {
        let mut streaks = self.streaks.lock().expect("streak lock poisoned");
        let streak = streaks.entry(key.clone()).or_insert(Streak {
            consecutive_429: 0,
            updated_at: now,
        });
        streak.consecutive_429 += 1;
        streak.updated_at = now;
        streak.consecutive_429
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
