// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use cse_buffer::Buffer;
use cse_core::config::{discovery_retry_delay, tailing_grace};
use cse_core::{Agent, AgentRegistry, ConversationEvent, CoreError, RegistryEvent, Runtime};
use cse_parsers::{discoverer_for, parser_factory_for, ConversationFile};
use cse_tail::{spawn_tail, TailLine, TailMode};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::active_main::select_active_main;
use crate::hint::ResumeHintResolver;

/// Lifecycle events block the consumer; `ConversationEvent` is a
/// try-send, broadcast-only path for clients without an active buffer
/// subscription (§4.F "Watcher event channel").
#[derive(Debug, Clone)]
pub enum WatcherEvent {
    AgentAdded(Agent),
    AgentRemoved(String),
    AgentUpdated(Agent),
    ConversationStarted { agent: String, new_conversation_id: String },
    ConversationSwitched { agent: String, from: String, to: String },
    ConversationEvent { conversation_id: String, event: ConversationEvent },
}

struct TailingState {
    refcount: u32,
    cancel: CancellationToken,
    grace: Option<JoinHandle<()>>,
}

struct StreamHandle {
    conversation_id: String,
    agent_name: String,
    buffer: Arc<Buffer>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct WatcherInner {
    streams: HashMap<String, Arc<StreamHandle>>,
    conv_to_agent: HashMap<String, String>,
    active_by_agent: HashMap<String, String>,
}

fn tail_mode_for(runtime: Runtime) -> TailMode {
    match runtime {
        Runtime::Gemini => TailMode::FullDocument,
        Runtime::Claude | Runtime::Codex => TailMode::AppendOnly,
    }
}

pub struct ConversationWatcher {
    registry: Arc<dyn AgentRegistry>,
    hints: Arc<dyn ResumeHintResolver>,
    events_tx: mpsc::Sender<WatcherEvent>,
    root_cancel: CancellationToken,
    buffer_capacity: usize,
    /// `tmu` — per-agent tailing refcounts.
    tailing: Mutex<HashMap<String, TailingState>>,
    /// `wmu` — streams and routing tables. Lock ordering: `wmu` is never
    /// held while acquiring `tmu`; teardown that needs both releases
    /// `tmu` first (§5 "global lock ordering").
    state: Mutex<WatcherInner>,
}

impl ConversationWatcher {
    pub fn new(
        registry: Arc<dyn AgentRegistry>,
        hints: Arc<dyn ResumeHintResolver>,
        events_tx: mpsc::Sender<WatcherEvent>,
        buffer_capacity: usize,
    ) -> Arc<Self> {
        let watcher = Arc::new(Self {
            registry,
            hints,
            events_tx,
            root_cancel: CancellationToken::new(),
            buffer_capacity,
            tailing: Mutex::new(HashMap::new()),
            state: Mutex::new(WatcherInner::default()),
        });
        watcher.clone().spawn_registry_listener();
        watcher
    }

    fn spawn_registry_listener(self: Arc<Self>) {
        let mut rx = self.registry.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(RegistryEvent::AgentAdded(a)) => {
                        if self.events_tx.send(WatcherEvent::AgentAdded(a)).await.is_err() {
                            break;
                        }
                    }
                    Ok(RegistryEvent::AgentUpdated(a)) => {
                        if self.events_tx.send(WatcherEvent::AgentUpdated(a)).await.is_err() {
                            break;
                        }
                    }
                    Ok(RegistryEvent::AgentRemoved(name)) => {
                        self.on_agent_removed(&name).await;
                        if self.events_tx.send(WatcherEvent::AgentRemoved(name)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    pub fn conversation_for_agent(&self, agent_name: &str) -> Option<String> {
        self.state.lock().active_by_agent.get(agent_name).cloned()
    }

    pub fn agent_for_conversation(&self, conversation_id: &str) -> Option<String> {
        self.state.lock().conv_to_agent.get(conversation_id).cloned()
    }

    pub fn buffer_for(&self, conversation_id: &str) -> Option<Arc<Buffer>> {
        self.state.lock().streams.get(conversation_id).map(|s| s.buffer.clone())
    }

    /// `EnsureTailing` (§4.F). Ref-counts a per-agent scope and spawns
    /// discovery the first time it goes from absent to present.
    pub async fn ensure_tailing(self: &Arc<Self>, agent_name: &str) -> Result<(), CoreError> {
        {
            let mut tailing = self.tailing.lock();
            if let Some(st) = tailing.get_mut(agent_name) {
                st.refcount += 1;
                if let Some(h) = st.grace.take() {
                    h.abort();
                }
                return Ok(());
            }
        }

        let agent = self
            .registry
            .get(agent_name)
            .ok_or_else(|| CoreError::AgentNotFound(agent_name.to_string()))?;
        let cancel = self.root_cancel.child_token();
        {
            let mut tailing = self.tailing.lock();
            tailing
                .insert(agent_name.to_string(), TailingState { refcount: 1, cancel: cancel.clone(), grace: None });
        }

        let watcher = self.clone();
        tokio::spawn(async move { watcher.discover(agent, cancel).await });
        Ok(())
    }

    /// `ReleaseTailing` (§4.F). The 30 s grace timer's re-check under
    /// `tmu` is the correctness guarantee; aborting it in `ensure_tailing`
    /// is advisory only.
    pub fn release_tailing(self: &Arc<Self>, agent_name: &str) {
        let mut tailing = self.tailing.lock();
        let Some(st) = tailing.get_mut(agent_name) else { return };
        if st.refcount == 0 {
            return;
        }
        st.refcount -= 1;
        if st.refcount == 0 {
            let watcher = self.clone();
            let name = agent_name.to_string();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(tailing_grace()).await;
                watcher.grace_fire(&name).await;
            });
            st.grace = Some(handle);
        }
    }

    async fn grace_fire(self: &Arc<Self>, agent_name: &str) {
        let cancel = {
            let mut tailing = self.tailing.lock();
            match tailing.get(agent_name) {
                Some(st) if st.refcount == 0 => tailing.remove(agent_name).map(|st| st.cancel),
                _ => None,
            }
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
            self.cleanup_agent(agent_name).await;
        }
    }

    async fn on_agent_removed(self: &Arc<Self>, agent_name: &str) {
        self.cleanup_agent(agent_name).await;
        let mut tailing = self.tailing.lock();
        if let Some(st) = tailing.remove(agent_name) {
            st.cancel.cancel();
        }
    }

    /// Cancels and removes every stream owned by `agent_name`, including
    /// subagent streams (§4.F "Cleanup").
    async fn cleanup_agent(self: &Arc<Self>, agent_name: &str) {
        let removed: Vec<Arc<StreamHandle>> = {
            let mut state = self.state.lock();
            let ids: Vec<String> = state
                .streams
                .values()
                .filter(|s| s.agent_name == agent_name)
                .map(|s| s.conversation_id.clone())
                .collect();
            let mut removed = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(h) = state.streams.remove(&id) {
                    state.conv_to_agent.remove(&id);
                    removed.push(h);
                }
            }
            state.active_by_agent.remove(agent_name);
            removed
        };
        for handle in removed {
            handle.cancel.cancel();
        }
    }

    /// Discovery pipeline (§4.F): find files, pick the active main,
    /// start every stream, then arm directory notifications so new files
    /// re-trigger this same pipeline.
    async fn discover(self: &Arc<Self>, agent: Agent, cancel: CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        let discoverer = discoverer_for(agent.runtime);
        let result = discoverer.find_conversations(&agent.name, &agent.work_dir);

        if result.files.is_empty() {
            self.watch_dirs_for_rediscovery(agent.clone(), result.watch_dirs, cancel.clone());
            let watcher = self.clone();
            let retry_agent = agent;
            let retry_cancel = cancel;
            tokio::spawn(async move {
                tokio::select! {
                    _ = retry_cancel.cancelled() => {}
                    _ = tokio::time::sleep(discovery_retry_delay()) => {
                        watcher.discover(retry_agent, retry_cancel).await;
                    }
                }
            });
            return;
        }

        let (mains, subagents): (Vec<ConversationFile>, Vec<ConversationFile>) =
            result.files.into_iter().partition(|f| !f.is_subagent);

        let peers: Vec<Agent> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|a| a.runtime == agent.runtime && a.work_dir == agent.work_dir)
            .collect();

        if let Some(active) = select_active_main(&agent, &mains, &peers, self.hints.as_ref()) {
            self.start_conversation_stream(&agent, active, true, cancel.clone()).await;
        }
        for file in subagents {
            self.start_conversation_stream(&agent, file, false, cancel.clone()).await;
        }

        self.watch_dirs_for_rediscovery(agent, result.watch_dirs, cancel);
    }

    fn watch_dirs_for_rediscovery(
        self: &Arc<Self>,
        agent: Agent,
        watch_dirs: Vec<PathBuf>,
        cancel: CancellationToken,
    ) {
        if watch_dirs.is_empty() {
            return;
        }
        let watcher = self.clone();
        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::unbounded_channel::<()>();
            let mut notify_watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                if let Ok(ev) = res {
                    if matches!(ev.kind, notify::EventKind::Create(_)) {
                        let _ = tx.send(());
                    }
                }
            }) {
                Ok(w) => w,
                Err(e) => {
                    warn!(agent = %agent.name, error = %e, "watcher: failed to create directory watcher");
                    return;
                }
            };
            for dir in &watch_dirs {
                if let Err(e) = notify::Watcher::watch(&mut notify_watcher, dir, notify::RecursiveMode::NonRecursive) {
                    warn!(agent = %agent.name, dir = %dir.display(), error = %e, "watcher: failed to watch directory");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                got = rx.recv() => {
                    if got.is_some() {
                        watcher.discover(agent, cancel).await;
                    }
                }
            }
        });
    }

    /// Starting a conversation stream (§4.F): install Discoverer →
    /// Tailer → Parser → Buffer under `wmu`, emit the appropriate
    /// lifecycle event, then pump lines into the buffer.
    async fn start_conversation_stream(
        self: &Arc<Self>,
        agent: &Agent,
        file: ConversationFile,
        is_main: bool,
        per_agent_cancel: CancellationToken,
    ) {
        let stream_cancel = per_agent_cancel.child_token();
        let mut tail_rx = spawn_tail(file.path.clone(), true, tail_mode_for(agent.runtime), stream_cancel.clone());
        let mut parser = parser_factory_for(agent.runtime).create(&agent.name, &file.conversation_id);
        let buffer = Arc::new(Buffer::new(self.buffer_capacity));

        let lifecycle_event = {
            let mut state = self.state.lock();
            if let Some(old) = state.streams.remove(&file.conversation_id) {
                old.cancel.cancel();
            }
            let handle = Arc::new(StreamHandle {
                conversation_id: file.conversation_id.clone(),
                agent_name: agent.name.clone(),
                buffer: buffer.clone(),
                cancel: stream_cancel,
            });
            state.streams.insert(file.conversation_id.clone(), handle);
            state.conv_to_agent.insert(file.conversation_id.clone(), agent.name.clone());

            if !is_main {
                None
            } else {
                let previous = state.active_by_agent.insert(agent.name.clone(), file.conversation_id.clone());
                match previous {
                    Some(prev_id) if prev_id != file.conversation_id => {
                        if let Some(old_main) = state.streams.remove(&prev_id) {
                            old_main.cancel.cancel();
                        }
                        state.conv_to_agent.remove(&prev_id);
                        Some(WatcherEvent::ConversationSwitched {
                            agent: agent.name.clone(),
                            from: prev_id,
                            to: file.conversation_id.clone(),
                        })
                    }
                    Some(_) => None,
                    None => Some(WatcherEvent::ConversationStarted {
                        agent: agent.name.clone(),
                        new_conversation_id: file.conversation_id.clone(),
                    }),
                }
            }
        };

        if let Some(event) = lifecycle_event {
            let _ = self.events_tx.send(event).await;
        }

        let watcher = self.clone();
        let conversation_id = file.conversation_id.clone();
        tokio::spawn(async move {
            while let Some(line) = tail_rx.recv().await {
                match line {
                    TailLine::HistoryDone => buffer.mark_history_done(),
                    TailLine::Line(bytes) => match parser.parse(&bytes) {
                        Ok(events) => {
                            for event in events {
                                let appended = buffer.append(event);
                                let _ = watcher.events_tx.try_send(WatcherEvent::ConversationEvent {
                                    conversation_id: conversation_id.clone(),
                                    event: appended,
                                });
                            }
                        }
                        Err(e) => {
                            warn!(conversation_id = %conversation_id, error = %e, "watcher: parser internal fault");
                        }
                    },
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cse_core::test_support::{test_agent, MockRegistry};
    use std::time::Duration;

    fn new_watcher(registry: Arc<MockRegistry>) -> (Arc<ConversationWatcher>, mpsc::Receiver<WatcherEvent>) {
        let (tx, rx) = mpsc::channel(256);
        let watcher = ConversationWatcher::new(registry, Arc::new(crate::hint::NullHintResolver), tx, 1000);
        (watcher, rx)
    }

    #[tokio::test]
    async fn ensure_tailing_fails_for_unknown_agent() {
        let registry = Arc::new(MockRegistry::new());
        let (watcher, _rx) = new_watcher(registry);
        let result = watcher.ensure_tailing("ghost").await;
        assert!(matches!(result, Err(CoreError::AgentNotFound(name)) if name == "ghost"));
    }

    #[tokio::test]
    async fn ensure_tailing_refcounts_known_agent() {
        let registry = Arc::new(MockRegistry::new());
        registry.upsert(test_agent("a", Runtime::Claude, "/tmp/work"));
        let (watcher, _rx) = new_watcher(registry);

        watcher.ensure_tailing("a").await.unwrap();
        watcher.ensure_tailing("a").await.unwrap();
        watcher.release_tailing("a");
        watcher.release_tailing("a");
        // Second release drops refcount to 0 and arms a grace timer; it
        // must not panic or remove state synchronously.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn agent_removed_triggers_cleanup_and_forwards_lifecycle_event() {
        let registry = Arc::new(MockRegistry::new());
        registry.upsert(test_agent("a", Runtime::Claude, "/tmp/work"));
        let (watcher, mut rx) = new_watcher(registry.clone());

        watcher.ensure_tailing("a").await.unwrap();
        registry.remove("a");

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(matches!(event, Some(WatcherEvent::AgentRemoved(name)) if name == "a"));
    }
}
