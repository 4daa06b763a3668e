// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concrete `AgentRegistry` backed by `tmux list-panes`, polled on an
//! interval (§1: "Agent Registry... treated as an opaque source of
//! `{name, runtime, workDir, panePID, attached}` records"). Grounded on
//! the teacher's own `tmux capture-pane`/`kill-session` shell-out style,
//! generalized from one-shot commands to a polling background task.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cse_core::{Agent, AgentRegistry, RegistryEvent, Runtime};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const LIFECYCLE_CHANNEL_CAPACITY: usize = 256;

pub struct TmuxRegistry {
    agents: Mutex<HashMap<String, Agent>>,
    tx: broadcast::Sender<RegistryEvent>,
}

impl TmuxRegistry {
    /// Spawn the polling task and return the registry handle immediately;
    /// the first poll populates state asynchronously.
    pub fn spawn(work_dir_filter: Option<PathBuf>) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        let registry = Arc::new(Self { agents: Mutex::new(HashMap::new()), tx });

        let poller = registry.clone();
        tokio::spawn(async move {
            loop {
                poller.poll_once(work_dir_filter.as_deref()).await;
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        });

        registry
    }

    async fn poll_once(&self, work_dir_filter: Option<&std::path::Path>) {
        let output = tokio::process::Command::new("tmux")
            .args([
                "list-panes",
                "-a",
                "-F",
                "#{pane_id}\t#{pane_current_path}\t#{pane_pid}\t#{session_attached}\t#{pane_current_command}",
            ])
            .output()
            .await;

        let output = match output {
            Ok(o) if o.status.success() => o,
            Ok(o) => {
                debug!(status = ?o.status, "registry: tmux list-panes exited non-zero (no server running?)");
                self.reconcile(HashMap::new());
                return;
            }
            Err(e) => {
                warn!(error = %e, "registry: failed to invoke tmux");
                return;
            }
        };

        let text = String::from_utf8_lossy(&output.stdout);
        let mut found = HashMap::new();
        for line in text.lines() {
            if let Some(agent) = parse_pane_line(line, work_dir_filter) {
                found.insert(agent.name.clone(), agent);
            }
        }
        self.reconcile(found);
    }

    fn reconcile(&self, found: HashMap<String, Agent>) {
        let mut agents = self.agents.lock();

        let removed: Vec<String> =
            agents.keys().filter(|name| !found.contains_key(*name)).cloned().collect();
        for name in removed {
            agents.remove(&name);
            let _ = self.tx.send(RegistryEvent::AgentRemoved(name));
        }

        for (name, agent) in found {
            match agents.get(&name) {
                Some(existing) if *existing == agent => {}
                Some(_) => {
                    agents.insert(name, agent.clone());
                    let _ = self.tx.send(RegistryEvent::AgentUpdated(agent));
                }
                None => {
                    agents.insert(name.clone(), agent.clone());
                    let _ = self.tx.send(RegistryEvent::AgentAdded(agent));
                }
            }
        }
    }
}

impl AgentRegistry for TmuxRegistry {
    fn snapshot(&self) -> Vec<Agent> {
        self.agents.lock().values().cloned().collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.tx.subscribe()
    }
}

fn runtime_from_command(command: &str) -> Option<Runtime> {
    match command {
        "claude" => Some(Runtime::Claude),
        "codex" => Some(Runtime::Codex),
        "gemini" => Some(Runtime::Gemini),
        _ => None,
    }
}

fn parse_pane_line(line: &str, work_dir_filter: Option<&std::path::Path>) -> Option<Agent> {
    let mut fields = line.splitn(5, '\t');
    let pane_id = fields.next()?.to_string();
    let current_path = fields.next()?;
    let pane_pid = fields.next()?.parse::<u32>().ok();
    let attached = fields.next()? != "0";
    let command = fields.next()?;

    let runtime = runtime_from_command(command)?;
    let work_dir = PathBuf::from(current_path);

    if let Some(filter) = work_dir_filter {
        if !work_dir.starts_with(filter) {
            return None;
        }
    }

    Some(Agent { name: pane_id, runtime, work_dir, pane_pid, attached })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_pane_line() {
        let line = "%3\t/home/user/project\t4242\t1\tclaude";
        let agent = parse_pane_line(line, None).expect("agent parsed");
        assert_eq!(agent.name, "%3");
        assert_eq!(agent.runtime, Runtime::Claude);
        assert_eq!(agent.work_dir, PathBuf::from("/home/user/project"));
        assert_eq!(agent.pane_pid, Some(4242));
        assert!(agent.attached);
    }

    #[test]
    fn skips_panes_running_an_unknown_command() {
        let line = "%3\t/home/user/project\t4242\t1\tbash";
        assert!(parse_pane_line(line, None).is_none());
    }

    #[test]
    fn filters_by_work_dir_prefix() {
        let line = "%3\t/home/user/project\t4242\t0\tcodex";
        assert!(parse_pane_line(line, Some(std::path::Path::new("/home/other"))).is_none());
        assert!(parse_pane_line(line, Some(std::path::Path::new("/home/user"))).is_some());
    }

    #[test]
    fn malformed_line_is_skipped_not_panicked() {
        assert!(parse_pane_line("not enough fields", None).is_none());
    }
}
