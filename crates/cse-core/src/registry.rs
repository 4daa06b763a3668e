// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Agent Registry is an external collaborator (§1): it enumerates
//! running agents and their working directories, and exposes a snapshot
//! API plus a lifecycle event channel. This module defines the trait
//! boundary only — the engine never polls the registry, it consumes its
//! lifecycle channel (§9).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ids::Runtime;

/// A running CLI agent process, as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub runtime: Runtime,
    pub work_dir: PathBuf,
    pub pane_pid: Option<u32>,
    pub attached: bool,
}

/// Lifecycle events the registry pushes to the watcher.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    AgentAdded(Agent),
    AgentRemoved(String),
    AgentUpdated(Agent),
}

/// Opaque source of agent records. The engine is testable against a
/// hand-driven mock (see `test_support::MockRegistry`) without depending on
/// any real process-tree introspection.
pub trait AgentRegistry: Send + Sync {
    /// Point-in-time list of known agents.
    fn snapshot(&self) -> Vec<Agent>;

    /// Look up one agent by name.
    fn get(&self, name: &str) -> Option<Agent> {
        self.snapshot().into_iter().find(|a| a.name == name)
    }

    /// Subscribe to lifecycle changes. Each call gets an independent
    /// receiver; delivery is at-least-once from the point of subscription.
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RegistryEvent>;
}
