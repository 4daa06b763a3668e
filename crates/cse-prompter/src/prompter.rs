// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

const POST_TEXT_PAUSE: Duration = Duration::from_millis(500);
const POST_ESCAPE_PAUSE: Duration = Duration::from_millis(100);
const ENTER_RETRY_PAUSE: Duration = Duration::from_millis(200);
const MAX_ENTER_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum PrompterError {
    #[error("tmux send-keys failed after {attempts} enter attempts: {last_error}")]
    EnterFailed { attempts: u32, last_error: String },
    #[error("failed to spawn tmux: {0}")]
    Spawn(String),
}

#[async_trait]
pub trait Prompter: Send + Sync {
    async fn send_prompt(&self, agent_name: &str, text: &str) -> Result<(), PrompterError>;
}

/// tmux-backed `Prompter`. `locks` hands out one `tokio::sync::Mutex` per
/// agent name so the injection sequence for a given agent never overlaps
/// itself, while two different agents proceed concurrently.
pub struct TmuxPrompter {
    locks: SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Default for TmuxPrompter {
    fn default() -> Self {
        Self { locks: SyncMutex::new(HashMap::new()) }
    }
}

impl TmuxPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, agent_name: &str) -> Arc<AsyncMutex<()>> {
        self.locks.lock().entry(agent_name.to_string()).or_insert_with(Default::default).clone()
    }

    async fn run_tmux(&self, args: &[&str]) -> Result<(), String> {
        let output = Command::new("tmux")
            .args(args)
            .output()
            .await
            .map_err(|e| format!("spawn failed: {e}"))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }

    async fn is_detached(&self, agent_name: &str) -> bool {
        match Command::new("tmux").args(["list-clients", "-t", agent_name]).output().await {
            Ok(output) => output.stdout.is_empty(),
            Err(_) => false,
        }
    }

    async fn resize_dance(&self, agent_name: &str) {
        let _ = self.run_tmux(&["resize-window", "-t", agent_name, "-x", "-1"]).await;
        let _ = self.run_tmux(&["resize-window", "-t", agent_name, "-x", "+1"]).await;
    }
}

#[async_trait]
impl Prompter for TmuxPrompter {
    async fn send_prompt(&self, agent_name: &str, text: &str) -> Result<(), PrompterError> {
        let lock = self.lock_for(agent_name);
        let _guard = lock.lock().await;

        self.run_tmux(&["send-keys", "-t", agent_name, "-l", text])
            .await
            .map_err(PrompterError::Spawn)?;
        tokio::time::sleep(POST_TEXT_PAUSE).await;

        self.run_tmux(&["send-keys", "-t", agent_name, "Escape"])
            .await
            .map_err(PrompterError::Spawn)?;
        tokio::time::sleep(POST_ESCAPE_PAUSE).await;

        if self.is_detached(agent_name).await {
            self.resize_dance(agent_name).await;
        }

        let mut last_error = String::new();
        for attempt in 1..=MAX_ENTER_ATTEMPTS {
            match self.run_tmux(&["send-keys", "-t", agent_name, "Enter"]).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(agent = agent_name, attempt, error = %e, "prompter: enter attempt failed");
                    last_error = e;
                }
            }
            tokio::time::sleep(ENTER_RETRY_PAUSE).await;
        }

        Err(PrompterError::EnterFailed { attempts: MAX_ENTER_ATTEMPTS, last_error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_for_returns_the_same_handle_for_repeat_calls() {
        let p = TmuxPrompter::new();
        let a = p.lock_for("agent-1");
        let b = p.lock_for("agent-1");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn lock_for_returns_distinct_handles_per_agent() {
        let p = TmuxPrompter::new();
        let a = p.lock_for("agent-1");
        let b = p.lock_for("agent-2");
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
