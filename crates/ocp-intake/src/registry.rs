// SPDX-License-Identifier: MIT OR Apache-2.0

//! Agent, room, and thread registries used for identity resolution and
//! cross-entity checks at intake.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// An agent row: a named autonomous actor owned by one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRow {
    /// Agent identifier.
    pub agent_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Owning principal.
    pub principal_id: String,
}

/// A room record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    /// Room identifier.
    pub room_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
}

/// A thread record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    /// Thread identifier.
    pub thread_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Owning room.
    pub room_id: String,
}

#[derive(Default)]
struct Tables {
    agents: HashMap<String, AgentRow>,
    by_principal: HashMap<String, String>,
    rooms: HashMap<String, RoomRecord>,
    threads: HashMap<String, ThreadRecord>,
}

/// Shared registry. Clones share state.
#[derive(Clone, Default)]
pub struct Registry {
    tables: Arc<Mutex<Tables>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl Registry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its principal.
    pub fn register_agent(
        &self,
        workspace_id: impl Into<String>,
        agent_id: impl Into<String>,
        principal_id: impl Into<String>,
    ) -> AgentRow {
        let row = AgentRow {
            agent_id: agent_id.into(),
            workspace_id: workspace_id.into(),
            principal_id: principal_id.into(),
        };
        let mut tables = self.tables.lock().expect("registry lock poisoned");
        tables
            .by_principal
            .insert(row.principal_id.clone(), row.agent_id.clone());
        tables.agents.insert(row.agent_id.clone(), row.clone());
        row
    }

    /// Register a room.
    pub fn register_room(
        &self,
        workspace_id: impl Into<String>,
        room_id: impl Into<String>,
    ) -> RoomRecord {
        let row = RoomRecord {
            room_id: room_id.into(),
            workspace_id: workspace_id.into(),
        };
        self.tables
            .lock()
            .expect("registry lock poisoned")
            .rooms
            .insert(row.room_id.clone(), row.clone());
        row
    }

    /// Register a thread in a room.
    pub fn register_thread(
        &self,
        workspace_id: impl Into<String>,
        room_id: impl Into<String>,
        thread_id: impl Into<String>,
    ) -> ThreadRecord {
        let row = ThreadRecord {
            thread_id: thread_id.into(),
            workspace_id: workspace_id.into(),
            room_id: room_id.into(),
        };
        self.tables
            .lock()
            .expect("registry lock poisoned")
            .threads
            .insert(row.thread_id.clone(), row.clone());
        row
    }

    /// The agent owned by a principal, if any.
    #[must_use]
    pub fn agent_by_principal(&self, principal_id: &str) -> Option<AgentRow> {
        let tables = self.tables.lock().expect("registry lock poisoned");
        let agent_id = tables.by_principal.get(principal_id)?;
        tables.agents.get(agent_id).cloned()
    }

    /// Agent lookup by id.
    #[must_use]
    pub fn agent(&self, agent_id: &str) -> Option<AgentRow> {
        self.tables
            .lock()
            .expect("registry lock poisoned")
            .agents
            .get(agent_id)
            .cloned()
    }

    /// Room lookup.
    #[must_use]
    pub fn room(&self, room_id: &str) -> Option<RoomRecord> {
        self.tables
            .lock()
            .expect("registry lock poisoned")
            .rooms
            .get(room_id)
            .cloned()
    }

    /// Thread lookup.
    #[must_use]
    pub fn thread(&self, thread_id: &str) -> Option<ThreadRecord> {
        self.tables
            .lock()
            .expect("registry lock poisoned")
            .threads
            .get(thread_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_resolution_by_principal() {
        let reg = Registry::new();
        reg.register_agent("ws1", "ag1", "prn_1");
        let row = reg.agent_by_principal("prn_1").unwrap();
        assert_eq!(row.agent_id, "ag1");
        assert!(reg.agent_by_principal("prn_2").is_none());
    }

    #[test]
    fn rooms_and_threads() {
        let reg = Registry::new();
        reg.register_room("ws1", "r1");
        reg.register_thread("ws1", "r1", "th1");
        assert_eq!(reg.room("r1").unwrap().workspace_id, "ws1");
        assert_eq!(reg.thread("th1").unwrap().room_id, "r1");
        assert!(reg.room("r9").is_none());
    }
}
