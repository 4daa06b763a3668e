// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use cse_core::{conversation_id, Runtime};

use crate::discoverer::{scan_files, sort_newest_first};
use crate::{ConversationFile, Discoverer, DiscoveryResult};

/// Codex-like runtime: `$HOME/.codex/sessions/*.jsonl`, flat (no
/// per-workdir subdirectory in this runtime's layout).
#[derive(Default)]
pub struct CodexDiscoverer;

impl Discoverer for CodexDiscoverer {
    fn find_conversations(&self, agent_name: &str, _work_dir: &Path) -> DiscoveryResult {
        let Some(home) = dirs::home_dir() else {
            return DiscoveryResult::default();
        };
        let sessions_dir = home.join(".codex").join("sessions");

        let mut files: Vec<ConversationFile> = scan_files(&sessions_dir, "jsonl")
            .into_iter()
            .map(|(path, modified)| {
                let native_id =
                    path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string();
                ConversationFile {
                    conversation_id: conversation_id(Runtime::Codex, agent_name, &native_id),
                    native_conversation_id: native_id,
                    path,
                    is_subagent: false,
                    modified,
                }
            })
            .collect();
        sort_newest_first(&mut files);

        DiscoveryResult { files, watch_dirs: vec![sessions_dir] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sessions_dir_is_not_an_error() {
        let d = CodexDiscoverer;
        let result = d.find_conversations("agent", Path::new("/tmp"));
        assert!(result.watch_dirs.len() == 1);
        let _ = result.files;
    }
}
