// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canonical JSON encoding for hashing.
//!
//! The appender and the audit verifier must share one encoder or chains
//! diverge. The rules: object keys sorted ASCII-ascending at every nesting
//! level, numbers in their shortest round-trip decimal form, strings UTF-8,
//! absent optional fields omitted, explicit `null` retained. `serde_json`
//! satisfies the first three by construction (`Value::Object` is a
//! `BTreeMap`), so canonicalization reduces to a plain re-serialization
//! with the hash fields stripped.

use serde_json::Value;
use thiserror::Error;

use crate::envelope::EventEnvelope;

/// Canonical encoding failures.
#[derive(Debug, Error)]
pub enum CanonicalError {
    /// The value could not be serialized.
    #[error("canonical encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    /// The envelope did not serialize to a JSON object.
    #[error("envelope did not encode as an object")]
    NotAnObject,
}

/// Canonically encode an arbitrary JSON value.
///
/// # Examples
///
/// ```
/// use serde_json::json;
///
/// let a = ocp_core::canonical_json(&json!({"b": 1, "a": {"z": null, "k": 2}})).unwrap();
/// assert_eq!(a, r#"{"a":{"k":2,"z":null},"b":1}"#);
/// ```
///
/// # Errors
///
/// Returns [`CanonicalError::Json`] if serialization fails.
pub fn canonical_json(value: &Value) -> Result<String, CanonicalError> {
    Ok(serde_json::to_string(value)?)
}

/// Canonically encode an envelope with both hash fields excluded.
///
/// This is the exact byte string the chain hash is computed over, and the
/// same function the audit verifier replays.
///
/// # Errors
///
/// Returns [`CanonicalError::Json`] if the envelope cannot be serialized,
/// or [`CanonicalError::NotAnObject`] if it does not encode as an object.
pub fn canonical_envelope(envelope: &EventEnvelope) -> Result<String, CanonicalError> {
    let mut v = serde_json::to_value(envelope)?;
    let Value::Object(map) = &mut v else {
        return Err(CanonicalError::NotAnObject);
    };
    map.remove("prev_event_hash");
    map.remove("event_hash");
    Ok(serde_json::to_string(&v)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Actor, EventDraft};
    use chrono::Utc;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn keys_sorted_at_every_level() {
        let v = json!({"z": {"b": 1, "a": 2}, "a": [{"y": 1, "x": 2}]});
        let s = canonical_json(&v).unwrap();
        assert_eq!(s, r#"{"a":[{"x":2,"y":1}],"z":{"a":2,"b":1}}"#);
    }

    #[test]
    fn null_retained() {
        let s = canonical_json(&json!({"a": null})).unwrap();
        assert_eq!(s, r#"{"a":null}"#);
    }

    #[test]
    fn numbers_shortest_roundtrip() {
        let s = canonical_json(&json!({"a": 1.5, "b": 10, "c": 0.1})).unwrap();
        assert_eq!(s, r#"{"a":1.5,"b":10,"c":0.1}"#);
    }

    #[test]
    fn envelope_canonical_excludes_hashes() {
        let mut env = EventDraft::new("message.created", "ws1", Actor::agent("ag1"))
            .data(json!({"text": "hi"}))
            .into_envelope(1, Utc::now());
        let before = canonical_envelope(&env).unwrap();
        env.prev_event_hash = Some("aaaa".into());
        env.event_hash = Some("bbbb".into());
        let after = canonical_envelope(&env).unwrap();
        assert_eq!(before, after);
        assert!(!after.contains("event_hash"));
    }

    #[test]
    fn envelope_canonical_is_stable() {
        let env = EventDraft::new("message.created", "ws1", Actor::agent("ag1"))
            .data(json!({"b": 2, "a": 1}))
            .into_envelope(3, Utc::now());
        assert_eq!(
            canonical_envelope(&env).unwrap(),
            canonical_envelope(&env).unwrap()
        );
    }

    proptest! {
        #[test]
        fn canonical_is_deterministic(keys in proptest::collection::vec("[a-z]{1,8}", 1..8)) {
            let mut obj = serde_json::Map::new();
            for (i, k) in keys.iter().enumerate() {
                obj.insert(k.clone(), json!(i));
            }
            let v = Value::Object(obj);
            prop_assert_eq!(canonical_json(&v).unwrap(), canonical_json(&v).unwrap());
        }

        #[test]
        fn canonical_roundtrips_value(n in any::<i64>()) {
            let v = json!({"n": n});
            let s = canonical_json(&v).unwrap();
            let back: Value = serde_json::from_str(&s).unwrap();
            prop_assert_eq!(back, v);
        }
    }
}
