// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Work-item leases.
//!
//! A lease serializes agent turns on a unit of work: one row per
//! `(workspace, work_item_type, work_item_id)`, holding the agent and an
//! expiry. Rows are only ever inspected or mutated under a row lock taken
//! NOWAIT: a conflicting lock is reported to the caller immediately, never
//! waited on, to preserve liveness under agent thrash. Run-typed work items
//! are not leased.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use ocp_core::SharedClock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Keys and rows
// ---------------------------------------------------------------------------

/// Kind of leasable work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemType {
    /// An approval awaiting a decision.
    Approval,
    /// A running experiment.
    Experiment,
    /// An open incident.
    Incident,
}

impl fmt::Display for WorkItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Approval => "approval",
            Self::Experiment => "experiment",
            Self::Incident => "incident",
        };
        f.write_str(s)
    }
}

/// Identity of a lease row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseKey {
    /// Tenant boundary.
    pub workspace_id: String,
    /// Work item kind.
    pub work_item_type: WorkItemType,
    /// Work item identifier.
    pub work_item_id: String,
}

impl LeaseKey {
    /// Construct a key.
    #[must_use]
    pub fn new(
        workspace_id: impl Into<String>,
        work_item_type: WorkItemType,
        work_item_id: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            work_item_type,
            work_item_id: work_item_id.into(),
        }
    }
}

/// A lease row. Live iff `expires_at > now`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRow {
    /// Holder.
    pub agent_id: String,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
    /// Bumped on every acquire/renew.
    pub version: u64,
}

impl LeaseRow {
    /// Whether the lease is live at the given instant.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

// ---------------------------------------------------------------------------
// Errors and verdicts
// ---------------------------------------------------------------------------

/// Lease operation failures.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// A live lease is held by another agent.
    #[error("lease held by {holder} until {expires_at}")]
    AlreadyHeld {
        /// Current holder.
        holder: String,
        /// Current expiry.
        expires_at: DateTime<Utc>,
    },
    /// The row lock is taken by another in-flight request.
    #[error("lease row lock unavailable")]
    LockUnavailable,
}

/// Outcome of verifying a lease under a held row lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseVerdict {
    /// Row present, holder matches, lease live.
    Held {
        /// The verified row.
        row: LeaseRow,
    },
    /// Row absent. The write proceeds with a missing-lease warning.
    Missing,
    /// Row present but held by someone else or expired.
    Preempted,
}

// ---------------------------------------------------------------------------
// LeaseManager
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    rows: HashMap<LeaseKey, LeaseRow>,
    locked: HashSet<LeaseKey>,
}

/// Owner of the lease table. Clones share state.
#[derive(Clone)]
pub struct LeaseManager {
    tables: Arc<Mutex<Tables>>,
    clock: SharedClock,
}

impl fmt::Debug for LeaseManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseManager").finish_non_exhaustive()
    }
}

impl LeaseManager {
    /// Create an empty lease table driven by the given clock.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            clock,
        }
    }

    /// Acquire or renew a lease.
    ///
    /// A live lease held by another agent refuses with
    /// [`LeaseError::AlreadyHeld`]. An expired row or a row already held by
    /// the caller is replaced, bumping the version.
    ///
    /// # Errors
    ///
    /// [`LeaseError::AlreadyHeld`] on a live foreign lease;
    /// [`LeaseError::LockUnavailable`] if the row is locked by an
    /// in-flight request.
    pub fn acquire(
        &self,
        key: LeaseKey,
        agent_id: &str,
        ttl: Duration,
    ) -> Result<LeaseRow, LeaseError> {
        let now = self.clock.now();
        let mut tables = self.tables.lock().expect("lease lock poisoned");
        if tables.locked.contains(&key) {
            return Err(LeaseError::LockUnavailable);
        }
        let next_version = match tables.rows.get(&key) {
            Some(row) if row.is_live(now) && row.agent_id != agent_id => {
                return Err(LeaseError::AlreadyHeld {
                    holder: row.agent_id.clone(),
                    expires_at: row.expires_at,
                });
            }
            Some(row) => row.version + 1,
            None => 1,
        };
        let row = LeaseRow {
            agent_id: agent_id.to_string(),
            expires_at: now + ttl,
            version: next_version,
        };
        tables.rows.insert(key.clone(), row.clone());
        tracing::debug!(
            workspace_id = %key.workspace_id,
            work_item = %format!("{}:{}", key.work_item_type, key.work_item_id),
            agent_id,
            version = row.version,
            "lease acquired"
        );
        Ok(row)
    }

    /// Release a lease held by the given agent. Releasing a row the agent
    /// does not hold is a no-op.
    pub fn release(&self, key: &LeaseKey, agent_id: &str) {
        let mut tables = self.tables.lock().expect("lease lock poisoned");
        if tables
            .rows
            .get(key)
            .is_some_and(|row| row.agent_id == agent_id)
        {
            tables.rows.remove(key);
        }
    }

    /// Take the row lock NOWAIT.
    ///
    /// # Errors
    ///
    /// [`LeaseError::LockUnavailable`] if another request holds the lock;
    /// the caller reports the conflict rather than waiting.
    pub fn try_lock_row(&self, key: LeaseKey) -> Result<RowLock, LeaseError> {
        let mut tables = self.tables.lock().expect("lease lock poisoned");
        if !tables.locked.insert(key.clone()) {
            return Err(LeaseError::LockUnavailable);
        }
        Ok(RowLock {
            key,
            manager: self.clone(),
        })
    }

    /// Current snapshot of a row without locking; for reads that tolerate
    /// staleness.
    #[must_use]
    pub fn peek(&self, key: &LeaseKey) -> Option<LeaseRow> {
        self.tables
            .lock()
            .expect("lease lock poisoned")
            .rows
            .get(key)
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// RowLock
// ---------------------------------------------------------------------------

/// RAII row lock over one lease row. Dropping releases the lock.
pub struct RowLock {
    key: LeaseKey,
    manager: LeaseManager,
}

impl fmt::Debug for RowLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowLock").field("key", &self.key).finish()
    }
}

impl RowLock {
    /// Verify the row against the calling agent at the current instant.
    #[must_use]
    pub fn verify(&self, agent_id: &str) -> LeaseVerdict {
        let now = self.manager.clock.now();
        let tables = self.manager.tables.lock().expect("lease lock poisoned");
        match tables.rows.get(&self.key) {
            None => LeaseVerdict::Missing,
            Some(row) if row.agent_id == agent_id && row.is_live(now) => {
                LeaseVerdict::Held { row: row.clone() }
            }
            Some(_) => LeaseVerdict::Preempted,
        }
    }

    /// Delete the row while holding the lock. Used when a terminal intent
    /// commits.
    pub fn delete(&self) {
        let mut tables = self.manager.tables.lock().expect("lease lock poisoned");
        tables.rows.remove(&self.key);
    }

    /// The locked key.
    #[must_use]
    pub fn key(&self) -> &LeaseKey {
        &self.key
    }
}

impl Drop for RowLock {
    fn drop(&mut self) {
        let mut tables = self.manager.tables.lock().expect("lease lock poisoned");
        tables.locked.remove(&self.key);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
