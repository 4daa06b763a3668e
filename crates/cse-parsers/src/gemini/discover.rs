// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use cse_core::{conversation_id, Runtime};

use crate::discoverer::{scan_files, sort_newest_first};
use crate::{ConversationFile, Discoverer, DiscoveryResult};

/// Gemini-like runtime: `$HOME/.gemini/tmp/<project-hash>/chats/*.json`,
/// one full-document file per session, no resume hint to disambiguate
/// peers (§4.F active-main selection always falls through to "newest" or
/// the deterministic distribution for this runtime).
#[derive(Default)]
pub struct GeminiDiscoverer;

impl Discoverer for GeminiDiscoverer {
    fn find_conversations(&self, agent_name: &str, work_dir: &Path) -> DiscoveryResult {
        let Some(home) = dirs::home_dir() else {
            return DiscoveryResult::default();
        };
        let chats_dir = home
            .join(".gemini")
            .join("tmp")
            .join(project_hash(work_dir))
            .join("chats");

        let mut files: Vec<ConversationFile> = scan_files(&chats_dir, "json")
            .into_iter()
            .map(|(path, modified)| {
                let native_id =
                    path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string();
                ConversationFile {
                    conversation_id: conversation_id(Runtime::Gemini, agent_name, &native_id),
                    native_conversation_id: native_id,
                    path,
                    is_subagent: false,
                    modified,
                }
            })
            .collect();
        sort_newest_first(&mut files);

        DiscoveryResult { files, watch_dirs: vec![chats_dir] }
    }
}

fn project_hash(work_dir: &Path) -> String {
    work_dir.display().to_string().replace(['/', '.'], "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_chats_dir_returns_empty_files_and_its_watch_dir() {
        let d = GeminiDiscoverer;
        let result = d.find_conversations("agent", Path::new("/tmp/nonexistent-workdir"));
        assert!(result.files.is_empty());
        assert_eq!(result.watch_dirs.len(), 1);
    }
}
