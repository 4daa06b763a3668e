// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The File Tailer. Given a path and `fromStart`, emits every complete
//! line, then a one-shot history-done marker, then continues to emit newly
//! appended lines until cancelled (§4.B).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cse_core::config::tail_poll_interval;
use notify::Watcher;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Scanner buffer floor for a single line (§4.B: "at least 3 MiB").
const MAX_LINE_BYTES: usize = 3 * 1024 * 1024;
const POLL_JITTER_MS: u64 = 200;
const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

/// One item emitted by the tailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailLine {
    /// A complete, newline-terminated line (newline stripped).
    Line(Vec<u8>),
    /// One-shot marker: the initial historical read finished.
    HistoryDone,
}

/// Whether the tailed file is append-only JSONL or a full document rewritten
/// wholesale on every update (§4.B, §9 "full-document vs append-only").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailMode {
    AppendOnly,
    FullDocument,
}

/// Spawn a background task that tails `path` and returns the receiving end
/// of its output channel. The task exits when `cancel` is cancelled.
pub fn spawn_tail(
    path: PathBuf,
    from_start: bool,
    mode: TailMode,
    cancel: CancellationToken,
) -> mpsc::Receiver<TailLine> {
    let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
    tokio::spawn(run(path, from_start, mode, cancel, tx));
    rx
}

struct TailState {
    offset: u64,
    partial: Vec<u8>,
}

async fn run(
    path: PathBuf,
    from_start: bool,
    mode: TailMode,
    cancel: CancellationToken,
    tx: mpsc::Sender<TailLine>,
) {
    let mut state = TailState { offset: 0, partial: Vec::new() };

    // Initial pass: always attempted exactly once, history-done follows
    // regardless of whether the file exists yet (§4.B).
    do_pass(&path, from_start, mode, &mut state, &tx).await;
    if tx.send(TailLine::HistoryDone).await.is_err() {
        return;
    }

    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<()>();
    let watch_dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if res.is_ok() {
            let _ = notify_tx.send(());
        }
    }) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!(error = %e, "tailer: failed to create directory watcher, relying on poll fallback");
            None
        }
    };
    if let Some(w) = watcher.as_mut() {
        if let Err(e) = w.watch(&watch_dir, notify::RecursiveMode::NonRecursive) {
            warn!(dir = %watch_dir.display(), error = %e, "tailer: failed to watch directory");
        }
    }

    let mut ticker = tokio::time::interval(jittered_poll_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                do_pass(&path, false, mode, &mut state, &tx).await;
            }
            got = notify_rx.recv() => {
                if got.is_none() {
                    break;
                }
                do_pass(&path, false, mode, &mut state, &tx).await;
            }
        }
        if tx.is_closed() {
            break;
        }
    }
}

/// Read whatever is new since `state.offset` (or reset-and-reread on
/// truncation / full-document growth), emitting each complete line. Never
/// returns an error to the caller — read failures are logged and retried on
/// the next pass (§7 item 5).
async fn do_pass(
    path: &Path,
    force_from_start: bool,
    mode: TailMode,
    state: &mut TailState,
    tx: &mpsc::Sender<TailLine>,
) {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "tailer: failed to open file");
            }
            return;
        }
    };

    let file_len = match file.metadata() {
        Ok(m) => m.len(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "tailer: failed to stat file");
            return;
        }
    };

    let truncated = file_len < state.offset;
    let full_document_changed = mode == TailMode::FullDocument && file_len != state.offset;
    let read_offset = if force_from_start {
        0
    } else if truncated || full_document_changed {
        0
    } else {
        state.offset
    };

    if read_offset == 0 && (truncated || full_document_changed) {
        state.partial.clear();
    }

    if let Err(e) = file.seek(SeekFrom::Start(read_offset)) {
        warn!(path = %path.display(), error = %e, "tailer: failed to seek");
        return;
    }

    let mut buf = Vec::new();
    if let Err(e) = file.read_to_end(&mut buf) {
        warn!(path = %path.display(), error = %e, "tailer: failed to read");
        return;
    }

    state.offset = read_offset + buf.len() as u64;

    let mut combined = std::mem::take(&mut state.partial);
    combined.extend_from_slice(&buf);

    let mut start = 0usize;
    for (i, byte) in combined.iter().enumerate() {
        if *byte == b'\n' {
            let mut line = combined[start..i].to_vec();
            if line.len() > MAX_LINE_BYTES {
                line.truncate(MAX_LINE_BYTES);
            }
            start = i + 1;
            if tx.send(TailLine::Line(line)).await.is_err() {
                return;
            }
        }
    }
    state.partial = combined[start..].to_vec();
}

fn jittered_poll_interval() -> Duration {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.subsec_nanos()).unwrap_or(0);
    let jitter = (nanos % POLL_JITTER_MS as u32) as u64;
    tail_poll_interval() + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration as StdDuration;

    async fn recv_timeout(rx: &mut mpsc::Receiver<TailLine>) -> Option<TailLine> {
        tokio::time::timeout(StdDuration::from_secs(2), rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn emits_existing_lines_then_history_done() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        {
            let mut f = File::create(&path).unwrap();
            writeln!(f, "one").unwrap();
            writeln!(f, "two").unwrap();
        }

        let cancel = CancellationToken::new();
        let mut rx = spawn_tail(path.clone(), true, TailMode::AppendOnly, cancel.clone());

        assert_eq!(recv_timeout(&mut rx).await, Some(TailLine::Line(b"one".to_vec())));
        assert_eq!(recv_timeout(&mut rx).await, Some(TailLine::Line(b"two".to_vec())));
        assert_eq!(recv_timeout(&mut rx).await, Some(TailLine::HistoryDone));

        cancel.cancel();
    }

    #[tokio::test]
    async fn history_done_emitted_even_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.jsonl");

        let cancel = CancellationToken::new();
        let mut rx = spawn_tail(path, true, TailMode::AppendOnly, cancel.clone());

        assert_eq!(recv_timeout(&mut rx).await, Some(TailLine::HistoryDone));
        cancel.cancel();
    }

    #[tokio::test]
    async fn follows_appended_lines_after_history_done() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        File::create(&path).unwrap();

        let cancel = CancellationToken::new();
        let mut rx = spawn_tail(path.clone(), true, TailMode::AppendOnly, cancel.clone());

        assert_eq!(recv_timeout(&mut rx).await, Some(TailLine::HistoryDone));

        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(f, "live-line").unwrap();
        }

        assert_eq!(recv_timeout(&mut rx).await, Some(TailLine::Line(b"live-line".to_vec())));
        cancel.cancel();
    }

    #[tokio::test]
    async fn detects_truncation_and_rereads_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        {
            let mut f = File::create(&path).unwrap();
            writeln!(f, "aaaaaaaaaa").unwrap();
        }

        let cancel = CancellationToken::new();
        let mut rx = spawn_tail(path.clone(), true, TailMode::AppendOnly, cancel.clone());

        assert_eq!(recv_timeout(&mut rx).await, Some(TailLine::Line(b"aaaaaaaaaa".to_vec())));
        assert_eq!(recv_timeout(&mut rx).await, Some(TailLine::HistoryDone));

        // Atomic rename-replace with a shorter file.
        let replacement = dir.path().join("a.jsonl.tmp");
        {
            let mut f = File::create(&replacement).unwrap();
            writeln!(f, "short").unwrap();
        }
        std::fs::rename(&replacement, &path).unwrap();

        assert_eq!(recv_timeout(&mut rx).await, Some(TailLine::Line(b"short".to_vec())));
        cancel.cancel();
    }

    #[tokio::test]
    async fn full_document_mode_rereads_whole_file_on_any_size_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        {
            let mut f = File::create(&path).unwrap();
            writeln!(f, "{{\"a\":1}}").unwrap();
        }

        let cancel = CancellationToken::new();
        let mut rx = spawn_tail(path.clone(), true, TailMode::FullDocument, cancel.clone());

        assert_eq!(recv_timeout(&mut rx).await, Some(TailLine::Line(b"{\"a\":1}".to_vec())));
        assert_eq!(recv_timeout(&mut rx).await, Some(TailLine::HistoryDone));

        {
            let mut f = File::create(&path).unwrap();
            writeln!(f, "{{\"a\":1,\"b\":2}}").unwrap();
        }

        assert_eq!(
            recv_timeout(&mut rx).await,
            Some(TailLine::Line(b"{\"a\":1,\"b\":2}".to_vec()))
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn cancellation_stops_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        File::create(&path).unwrap();

        let cancel = CancellationToken::new();
        let mut rx = spawn_tail(path, true, TailMode::AppendOnly, cancel.clone());
        assert_eq!(recv_timeout(&mut rx).await, Some(TailLine::HistoryDone));

        cancel.cancel();
        // Channel should close promptly; recv returns None rather than hanging.
        let result = tokio::time::timeout(StdDuration::from_secs(2), rx.recv()).await;
        assert!(matches!(result, Ok(None)));
    }
}
