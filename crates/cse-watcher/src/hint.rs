// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The "process-tree-derived runtime hint" input to active-main
//! selection (§4.F): a `--resume <id>` flag for R1, a `resume <id>`
//! sub-command for R2, or an open-file-table scan for R3. Deriving this
//! from a live process tree is OS- and vendor-specific; this crate only
//! defines the extension point the selection algorithm consumes.

use cse_core::Agent;

pub trait ResumeHintResolver: Send + Sync {
    /// The native conversation id this agent's process was launched (or
    /// is now attached) to resume, if determinable.
    fn resolve_hint(&self, agent: &Agent) -> Option<String>;
}

/// No-op resolver: active-main selection falls straight through to the
/// newest-file / peer-distribution rules.
#[derive(Default)]
pub struct NullHintResolver;

impl ResumeHintResolver for NullHintResolver {
    fn resolve_hint(&self, _agent: &Agent) -> Option<String> {
        None
    }
}
