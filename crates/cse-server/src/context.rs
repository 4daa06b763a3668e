// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared handles every connection task needs. One instance, built once
//! in `main`, cloned as an `Arc` into each spawned session.

use std::path::PathBuf;
use std::sync::Arc;

use cse_core::AgentRegistry;
use cse_prompter::Prompter;
use cse_watcher::{ConversationWatcher, WatcherEvent};
use tokio::sync::broadcast;

pub const PROTOCOL_VERSION: &str = "cse.v1";

pub struct ServerContext {
    pub registry: Arc<dyn AgentRegistry>,
    pub watcher: Arc<ConversationWatcher>,
    pub prompter: Arc<dyn Prompter>,
    pub watcher_events: broadcast::Sender<WatcherEvent>,
    pub auth_token: String,
    pub debug_serve_dir: Option<PathBuf>,
}

impl ServerContext {
    pub fn server_version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}
