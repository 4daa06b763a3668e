// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access, following the teacher's
//! `env.rs` convention of one function per tunable with a sane default.

use std::time::Duration;

/// Default per-conversation buffer capacity (§3: "default 100 000 in
/// production").
pub fn buffer_capacity() -> usize {
    std::env::var("CSE_BUFFER_CAPACITY")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(100_000)
}

/// Grace period after an agent's tailing refcount hits zero before
/// teardown (§5: 30s).
pub fn tailing_grace() -> Duration {
    std::env::var("CSE_TAILING_GRACE_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(30))
}

/// Pending `subscribe-conversation`/`follow-agent` timeout (§5: 30s).
pub fn pending_sub_timeout() -> Duration {
    std::env::var("CSE_PENDING_SUB_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(30))
}

/// Tailer's jittered poll fallback interval (§4.B: "~1s").
pub fn tail_poll_interval() -> Duration {
    std::env::var("CSE_POLL_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(1_000))
}

/// Discovery retry delay when no files are found yet (§4.F step 4: 5s).
pub fn discovery_retry_delay() -> Duration {
    std::env::var("CSE_DISCOVERY_RETRY_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}

/// Per-message write timeout on the session write pump (§5: 5s).
pub fn write_timeout() -> Duration {
    std::env::var("CSE_WRITE_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}

/// Buffered channel capacity per live subscriber (§4.C: 256).
pub const LIVE_CHANNEL_CAPACITY: usize = 256;

/// Events per `conversation-snapshot-chunk` (§4.G streaming worker: 500).
pub const SNAPSHOT_CHUNK_SIZE: usize = 500;

/// Scanner buffer floor for tailed lines (§4.B: "at least 3 MiB").
pub const MAX_LINE_BYTES: usize = 3 * 1024 * 1024;
