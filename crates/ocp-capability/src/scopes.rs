// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scope sets and attenuation.
//!
//! Scopes are a map with optional keys; each value is a sorted,
//! deduplicated set of strings (`BTreeSet` gives both for free). The
//! canonical persisted shape is compact: empty-set keys are dropped.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Read/write data-access scopes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataAccessScopes {
    /// Readable data classes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<BTreeSet<String>>,
    /// Writable data classes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<BTreeSet<String>>,
}

impl DataAccessScopes {
    fn normalized(mut self) -> Option<Self> {
        self.read = self.read.filter(|s| !s.is_empty());
        self.write = self.write.filter(|s| !s.is_empty());
        if self.read.is_none() && self.write.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

/// A capability token's scope map.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScopeSet {
    /// Rooms the holder may act in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rooms: Option<BTreeSet<String>>,
    /// Tools the holder may invoke.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<BTreeSet<String>>,
    /// Domains the holder may egress to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_domains: Option<BTreeSet<String>>,
    /// Action types the holder may perform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_types: Option<BTreeSet<String>>,
    /// Data-access scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_access: Option<DataAccessScopes>,
}

fn set_of(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|s| (*s).to_string()).collect()
}

fn intersect_key(
    parent: Option<&BTreeSet<String>>,
    requested: Option<&BTreeSet<String>>,
) -> Option<BTreeSet<String>> {
    // Only keys the caller requested survive; a key absent in the parent
    // is dropped outright.
    let requested = requested?;
    let parent = parent?;
    Some(parent.intersection(requested).cloned().collect())
}

impl ScopeSet {
    /// Empty scope set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `rooms` key.
    #[must_use]
    pub fn rooms(mut self, values: &[&str]) -> Self {
        self.rooms = Some(set_of(values));
        self
    }

    /// Set the `tools` key.
    #[must_use]
    pub fn tools(mut self, values: &[&str]) -> Self {
        self.tools = Some(set_of(values));
        self
    }

    /// Set the `egress_domains` key.
    #[must_use]
    pub fn egress_domains(mut self, values: &[&str]) -> Self {
        self.egress_domains = Some(set_of(values));
        self
    }

    /// Set the `action_types` key.
    #[must_use]
    pub fn action_types(mut self, values: &[&str]) -> Self {
        self.action_types = Some(set_of(values));
        self
    }

    /// Set the `data_access` key.
    #[must_use]
    pub fn data_access(mut self, read: &[&str], write: &[&str]) -> Self {
        self.data_access = Some(DataAccessScopes {
            read: Some(set_of(read)),
            write: Some(set_of(write)),
        });
        self
    }

    /// Canonical compact shape: empty-set keys dropped.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.rooms = self.rooms.filter(|s| !s.is_empty());
        self.tools = self.tools.filter(|s| !s.is_empty());
        self.egress_domains = self.egress_domains.filter(|s| !s.is_empty());
        self.action_types = self.action_types.filter(|s| !s.is_empty());
        self.data_access = self.data_access.and_then(DataAccessScopes::normalized);
        self
    }

    /// Per-key intersection against a parent: for each key the caller
    /// requested, the result is the set-intersection with the parent's
    /// value; a key absent in the parent is dropped. The result is in the
    /// canonical compact shape.
    #[must_use]
    pub fn attenuate(&self, parent: &ScopeSet) -> ScopeSet {
        let data_access = match (&self.data_access, &parent.data_access) {
            (Some(req), Some(par)) => Some(DataAccessScopes {
                read: intersect_key(par.read.as_ref(), req.read.as_ref()),
                write: intersect_key(par.write.as_ref(), req.write.as_ref()),
            }),
            _ => None,
        };
        ScopeSet {
            rooms: intersect_key(parent.rooms.as_ref(), self.rooms.as_ref()),
            tools: intersect_key(parent.tools.as_ref(), self.tools.as_ref()),
            egress_domains: intersect_key(
                parent.egress_domains.as_ref(),
                self.egress_domains.as_ref(),
            ),
            action_types: intersect_key(parent.action_types.as_ref(), self.action_types.as_ref()),
            data_access,
        }
        .normalized()
    }

    /// Whether every key of `self` is key-wise contained in `parent`.
    #[must_use]
    pub fn is_subset_of(&self, parent: &ScopeSet) -> bool {
        fn key_subset(child: Option<&BTreeSet<String>>, parent: Option<&BTreeSet<String>>) -> bool {
            match (child, parent) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(c), Some(p)) => c.is_subset(p),
            }
        }
        let data_ok = match (&self.data_access, &parent.data_access) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(c), Some(p)) => {
                key_subset(c.read.as_ref(), p.read.as_ref())
                    && key_subset(c.write.as_ref(), p.write.as_ref())
            }
        };
        data_ok
            && key_subset(self.rooms.as_ref(), parent.rooms.as_ref())
            && key_subset(self.tools.as_ref(), parent.tools.as_ref())
            && key_subset(self.egress_domains.as_ref(), parent.egress_domains.as_ref())
            && key_subset(self.action_types.as_ref(), parent.action_types.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attenuation_intersects_per_key() {
        let parent = ScopeSet::new()
            .rooms(&["r1", "r2"])
            .tools(&["t1", "t2", "t3"]);
        let requested = ScopeSet::new().rooms(&["r2", "r3"]).tools(&["t1", "t4"]);
        let child = requested.attenuate(&parent);
        assert_eq!(child.rooms, Some(set_of(&["r2"])));
        assert_eq!(child.tools, Some(set_of(&["t1"])));
    }

    #[test]
    fn key_absent_in_parent_is_dropped() {
        let parent = ScopeSet::new().rooms(&["r1"]);
        let requested = ScopeSet::new().rooms(&["r1"]).egress_domains(&["example.com"]);
        let child = requested.attenuate(&parent);
        assert_eq!(child.rooms, Some(set_of(&["r1"])));
        assert!(child.egress_domains.is_none());
    }

    #[test]
    fn key_not_requested_is_not_inherited() {
        let parent = ScopeSet::new().rooms(&["r1"]).tools(&["t1"]);
        let requested = ScopeSet::new().rooms(&["r1"]);
        let child = requested.attenuate(&parent);
        assert!(child.tools.is_none());
    }

    #[test]
    fn empty_intersection_is_dropped_from_canonical_form() {
        let parent = ScopeSet::new().rooms(&["r1"]);
        let requested = ScopeSet::new().rooms(&["r9"]);
        let child = requested.attenuate(&parent);
        assert!(child.rooms.is_none());
        let json = serde_json::to_string(&child).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn data_access_intersects_read_and_write_independently() {
        let parent = ScopeSet::new().data_access(&["metrics", "logs"], &["logs"]);
        let requested = ScopeSet::new().data_access(&["metrics"], &["metrics"]);
        let child = requested.attenuate(&parent);
        let da = child.data_access.unwrap();
        assert_eq!(da.read, Some(set_of(&["metrics"])));
        // write intersection is empty, so the key is dropped.
        assert!(da.write.is_none());
    }

    #[test]
    fn attenuation_result_is_subset_of_parent() {
        let parent = ScopeSet::new()
            .rooms(&["r1", "r2"])
            .tools(&["t1"])
            .action_types(&["deploy"]);
        let requested = ScopeSet::new()
            .rooms(&["r2", "r9"])
            .tools(&["t1", "t2"])
            .action_types(&["deploy", "delete"]);
        let child = requested.attenuate(&parent);
        assert!(child.is_subset_of(&parent));
    }

    #[test]
    fn sets_are_sorted_and_deduplicated() {
        let s = ScopeSet::new().tools(&["b", "a", "b"]);
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, r#"{"tools":["a","b"]}"#);
    }

    #[test]
    fn serde_roundtrip() {
        let s = ScopeSet::new()
            .rooms(&["r1"])
            .data_access(&["metrics"], &["metrics"]);
        let json = serde_json::to_string(&s).unwrap();
        let back: ScopeSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
