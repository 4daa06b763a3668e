// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compiled agent filters for `subscribe-agents` (§4.G): up to four
//! independent regexes, each optional, ANDed together.

use cse_core::Agent;
use cse_wire::Envelope;
use regex::Regex;

#[derive(Default)]
pub struct AgentFilter {
    include_session: Option<Regex>,
    exclude_session: Option<Regex>,
    include_path: Option<Regex>,
    exclude_path: Option<Regex>,
}

impl AgentFilter {
    /// Compiles the four optional patterns carried on an envelope. Any
    /// invalid pattern is rejected as a whole (§8 S4: "filter regex
    /// rejected") rather than silently ignored.
    pub fn compile(env: &Envelope) -> Result<Self, regex::Error> {
        Ok(Self {
            include_session: compile_opt(env.include_session_filter.as_deref())?,
            exclude_session: compile_opt(env.exclude_session_filter.as_deref())?,
            include_path: compile_opt(env.include_path_filter.as_deref())?,
            exclude_path: compile_opt(env.exclude_path_filter.as_deref())?,
        })
    }

    pub fn matches(&self, agent: &Agent) -> bool {
        let work_dir = agent.work_dir.to_string_lossy();

        if let Some(re) = &self.include_session {
            if !re.is_match(&agent.name) {
                return false;
            }
        }
        if let Some(re) = &self.exclude_session {
            if re.is_match(&agent.name) {
                return false;
            }
        }
        if let Some(re) = &self.include_path {
            if !re.is_match(&work_dir) {
                return false;
            }
        }
        if let Some(re) = &self.exclude_path {
            if re.is_match(&work_dir) {
                return false;
            }
        }
        true
    }
}

fn compile_opt(pattern: Option<&str>) -> Result<Option<Regex>, regex::Error> {
    match pattern {
        Some(p) if !p.is_empty() => Ok(Some(Regex::new(p)?)),
        _ => Ok(None),
    }
}
