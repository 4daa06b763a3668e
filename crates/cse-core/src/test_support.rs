// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test-only builders and a hand-driven mock registry (§9: "this keeps the
//! engine testable with a hand-driven mock registry").

use std::path::PathBuf;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::ids::Runtime;
use crate::registry::{Agent, AgentRegistry, RegistryEvent};

pub struct MockRegistry {
    agents: Mutex<Vec<Agent>>,
    tx: broadcast::Sender<RegistryEvent>,
}

impl Default for MockRegistry {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self { agents: Mutex::new(Vec::new()), tx }
    }
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an agent and broadcast `agent-added`/`agent-updated`.
    pub fn upsert(&self, agent: Agent) {
        let mut agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        let existing = agents.iter_mut().find(|a| a.name == agent.name);
        let event = match existing {
            Some(slot) => {
                *slot = agent.clone();
                RegistryEvent::AgentUpdated(agent)
            }
            None => {
                agents.push(agent.clone());
                RegistryEvent::AgentAdded(agent)
            }
        };
        drop(agents);
        let _ = self.tx.send(event);
    }

    /// Remove an agent and broadcast `agent-removed`.
    pub fn remove(&self, name: &str) {
        let mut agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        agents.retain(|a| a.name != name);
        drop(agents);
        let _ = self.tx.send(RegistryEvent::AgentRemoved(name.to_string()));
    }
}

impl AgentRegistry for MockRegistry {
    fn snapshot(&self) -> Vec<Agent> {
        self.agents.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.tx.subscribe()
    }
}

/// Convenience builder for tests that don't care about most `Agent` fields.
pub fn test_agent(name: &str, runtime: Runtime, work_dir: &str) -> Agent {
    Agent {
        name: name.to_string(),
        runtime,
        work_dir: PathBuf::from(work_dir),
        pane_pid: None,
        attached: false,
    }
}
