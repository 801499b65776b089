// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic scorecard normalization.
//!
//! Metrics are sorted by key, hashed over their canonical encoding, and
//! folded into a weighted score clamped to [0, 1]. Thresholds: `pass` at
//! 0.75, `warn` at 0.5, `fail` below.

use ocp_core::canonical_json;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One scorecard metric as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Metric key.
    pub key: String,
    /// Observed value.
    pub value: f64,
    /// Weight in the aggregate score.
    pub weight: f64,
}

/// Aggregate decision derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorecardDecision {
    /// Score ≥ 0.75.
    Pass,
    /// Score ≥ 0.5.
    Warn,
    /// Score < 0.5.
    Fail,
}

/// Result of normalizing a metric set.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedScorecard {
    /// Metrics sorted by key.
    pub metrics: Vec<Metric>,
    /// `sha256:`-prefixed digest of the canonical sorted metrics.
    pub metrics_hash: String,
    /// Weighted score clamped to [0, 1].
    pub score: f64,
    /// Derived decision.
    pub decision: ScorecardDecision,
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Normalize a metric set deterministically.
///
/// Sorting is by `key`; equal keys keep their input order. A zero total
/// weight scores 0 and fails.
#[must_use]
pub fn normalize_scorecard(mut metrics: Vec<Metric>) -> NormalizedScorecard {
    metrics.sort_by(|a, b| a.key.cmp(&b.key));

    let canonical = canonical_json(&serde_json::to_value(&metrics).unwrap_or_default())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let metrics_hash = format!("sha256:{:x}", hasher.finalize());

    let total_weight: f64 = metrics.iter().map(|m| m.weight).sum();
    let score = if total_weight > 0.0 {
        clamp01(metrics.iter().map(|m| m.value * m.weight).sum::<f64>() / total_weight)
    } else {
        0.0
    };
    let decision = if score >= 0.75 {
        ScorecardDecision::Pass
    } else if score >= 0.5 {
        ScorecardDecision::Warn
    } else {
        ScorecardDecision::Fail
    };

    NormalizedScorecard {
        metrics,
        metrics_hash,
        score,
        decision,
    }
}
