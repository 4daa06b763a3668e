// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::{Path, PathBuf};

use cse_core::{conversation_id, Runtime};

use crate::discoverer::{scan_files, sort_newest_first};
use crate::{ConversationFile, Discoverer, DiscoveryResult};

/// Claude-like runtime: `$HOME/.claude/projects/<hashed-workdir>/*.jsonl`.
/// The hashing scheme is vendor-internal; this discoverer keys off
/// `workDir` verbatim, which is the layout real installs use once the
/// project directory has been created once by the CLI itself.
#[derive(Default)]
pub struct ClaudeDiscoverer;

impl Discoverer for ClaudeDiscoverer {
    fn find_conversations(&self, _agent_name: &str, work_dir: &Path) -> DiscoveryResult {
        let Some(home) = dirs::home_dir() else {
            return DiscoveryResult::default();
        };
        let project_dir = home.join(".claude").join("projects").join(project_slug(work_dir));

        let mut files: Vec<ConversationFile> = scan_files(&project_dir, "jsonl")
            .into_iter()
            .map(|(path, modified)| {
                let native_id =
                    path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string();
                let is_subagent = native_id.contains("subagent");
                ConversationFile {
                    conversation_id: conversation_id(Runtime::Claude, _agent_name, &native_id),
                    native_conversation_id: native_id,
                    path,
                    is_subagent,
                    modified,
                }
            })
            .collect();
        sort_newest_first(&mut files);

        DiscoveryResult { files, watch_dirs: vec![project_dir] }
    }
}

fn project_slug(work_dir: &Path) -> String {
    work_dir.display().to_string().replace(['/', '.'], "-")
}
