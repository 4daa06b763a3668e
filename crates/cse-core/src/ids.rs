// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime labels and conversation id formatting.
//!
//! A conversation id is always `"<runtime>:<agentName>:<nativeId>"`; the
//! `agentName` segment is opaque and may itself contain colons supplied by
//! the registry, so parsing back out only ever trusts the first and last
//! segments unless the full string round-trips through `conversation_id`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Vendor/flavor of CLI agent. Three supported runtimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    /// R1 — Claude-like: append-only JSONL, `--resume <id>` hint.
    Claude,
    /// R2 — Codex-like: append-only JSONL, `resume <id>` sub-command hint.
    Codex,
    /// R3 — Gemini-like: full-document JSON, no resume hint.
    Gemini,
}

impl Runtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Claude => "claude",
            Runtime::Codex => "codex",
            Runtime::Gemini => "gemini",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "claude" => Some(Runtime::Claude),
            "codex" => Some(Runtime::Codex),
            "gemini" => Some(Runtime::Gemini),
            _ => None,
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build a conversation id of the form `"<runtime>:<agentName>:<nativeId>"`.
pub fn conversation_id(runtime: Runtime, agent_name: &str, native_id: &str) -> String {
    format!("{}:{}:{}", runtime.as_str(), agent_name, native_id)
}

/// Extract the middle `agentName` segment from a conversation id, iff the
/// first segment names a known runtime. Per §4.G.1: callers fall back to
/// `watcher.convToAgent` when this returns `None`.
pub fn agent_name_from_conversation_id(conversation_id: &str) -> Option<&str> {
    let mut parts = conversation_id.splitn(3, ':');
    let runtime = parts.next()?;
    Runtime::from_str_opt(runtime)?;
    parts.next()
}
