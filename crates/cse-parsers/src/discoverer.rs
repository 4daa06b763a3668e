// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Discoverer contract (§4.D): "find files for agent+workDir, plus
//! dirs to watch". Must stay non-blocking at the millisecond scale and
//! must not retry internally — retry policy belongs to the watcher.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// One candidate transcript file on disk.
#[derive(Debug, Clone)]
pub struct ConversationFile {
    pub path: PathBuf,
    pub conversation_id: String,
    pub native_conversation_id: String,
    pub is_subagent: bool,
    pub modified: SystemTime,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryResult {
    /// Sorted by modification time descending.
    pub files: Vec<ConversationFile>,
    /// Canonical roots to watch for filesystem notifications, returned
    /// even when `files` is empty.
    pub watch_dirs: Vec<PathBuf>,
}

pub trait Discoverer: Send + Sync {
    fn find_conversations(&self, agent_name: &str, work_dir: &Path) -> DiscoveryResult;
}

/// Sort candidate files newest-first, the ordering every Discoverer
/// implementation must produce (§4.D).
pub(crate) fn sort_newest_first(files: &mut [ConversationFile]) {
    files.sort_by(|a, b| b.modified.cmp(&a.modified));
}

/// List files under `dir` with the given extension, non-recursively. A
/// missing directory is not an error — callers return it as a watch dir
/// regardless (§4.D: "missing directories are not errors").
pub(crate) fn scan_files(dir: &Path, ext: &str) -> Vec<(PathBuf, SystemTime)> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some(ext))
        .filter_map(|e| {
            let modified = e.metadata().ok()?.modified().ok()?;
            Some((e.path(), modified))
        })
        .collect()
}
