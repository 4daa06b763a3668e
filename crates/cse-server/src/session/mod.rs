// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The WebSocket Session Layer (§4.G). One `run` task per connection:
//! a single-threaded message loop owns all session state, a writer task
//! owns the socket's write half, and short-lived worker tasks stream a
//! single conversation's backlog-then-live events back through two
//! priority queues.

mod filters;

use std::collections::HashMap;
use std::sync::Arc;

use cse_buffer::{Buffer, Subscription};
use cse_core::config::{pending_sub_timeout, write_timeout, LIVE_CHANNEL_CAPACITY, SNAPSHOT_CHUNK_SIZE};
use cse_core::ids::agent_name_from_conversation_id;
use cse_core::{Agent, ConversationEvent, EventFilter};
use cse_wire::{AgentSummary, Envelope, Progress, WireEvent};
use cse_watcher::WatcherEvent;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::ServerContext;
use filters::AgentFilter;

struct SubEntry {
    conversation_id: String,
    agent_name: Option<String>,
    buffer_sub_id: u64,
    worker_cancel: CancellationToken,
    filter: EventFilter,
}

struct PendingConv {
    subscription_id: u64,
    agent_name: String,
    filter: EventFilter,
    message_id: Option<String>,
}

struct PendingFollow {
    subscription_id: u64,
    filter: EventFilter,
}

enum SessionControl {
    PendingConvTimedOut(String),
    PendingFollowTimedOut(String),
}

struct ClientSession {
    handshake_done: bool,
    agents_subscribed: bool,
    agent_filter: AgentFilter,
    next_subscription_id: u64,
    subs: HashMap<u64, SubEntry>,
    follows: HashMap<String, u64>,
    pending_conv_subs: HashMap<String, PendingConv>,
    pending_follows: HashMap<String, PendingFollow>,
}

impl ClientSession {
    fn new() -> Self {
        Self {
            handshake_done: false,
            agents_subscribed: false,
            agent_filter: AgentFilter::default(),
            next_subscription_id: 1,
            subs: HashMap::new(),
            follows: HashMap::new(),
            pending_conv_subs: HashMap::new(),
            pending_follows: HashMap::new(),
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_subscription_id;
        self.next_subscription_id += 1;
        id
    }

    fn register_pending_conv(
        &mut self,
        conversation_id: String,
        agent_name: String,
        subscription_id: u64,
        filter: EventFilter,
        message_id: Option<String>,
        control_tx: mpsc::Sender<SessionControl>,
    ) {
        self.pending_conv_subs
            .insert(conversation_id.clone(), PendingConv { subscription_id, agent_name, filter, message_id });
        tokio::spawn(async move {
            tokio::time::sleep(pending_sub_timeout()).await;
            let _ = control_tx.send(SessionControl::PendingConvTimedOut(conversation_id)).await;
        });
    }

    fn register_pending_follow(
        &mut self,
        agent_name: String,
        subscription_id: u64,
        filter: EventFilter,
        control_tx: mpsc::Sender<SessionControl>,
    ) {
        self.pending_follows.insert(agent_name.clone(), PendingFollow { subscription_id, filter });
        tokio::spawn(async move {
            tokio::time::sleep(pending_sub_timeout()).await;
            let _ = control_tx.send(SessionControl::PendingFollowTimedOut(agent_name)).await;
        });
    }
}

/// Two priority queues to one socket (§5 back-pressure policy): a full
/// critical queue tears the connection down, a full normal queue just
/// drops the message and logs.
#[derive(Clone)]
struct Outbox {
    normal_tx: mpsc::Sender<Message>,
    critical_tx: mpsc::Sender<Message>,
    shutdown: CancellationToken,
}

impl Outbox {
    fn send_normal(&self, env: &Envelope) {
        let Ok(text) = serde_json::to_string(env) else { return };
        if self.normal_tx.try_send(Message::Text(text.into())).is_err() {
            warn!(kind = %env.kind, "session: normal queue full or closed, dropping message");
        }
    }

    fn send_critical(&self, env: &Envelope) {
        let Ok(text) = serde_json::to_string(env) else { return };
        if self.critical_tx.try_send(Message::Text(text.into())).is_err() {
            warn!(kind = %env.kind, "session: critical queue full or closed, terminating connection");
            self.shutdown.cancel();
        }
    }
}

pub async fn run(ws: WebSocketStream<TcpStream>, ctx: Arc<ServerContext>) {
    let (sink, mut stream) = ws.split();
    let shutdown = CancellationToken::new();

    let (normal_tx, normal_rx) = mpsc::channel::<Message>(LIVE_CHANNEL_CAPACITY);
    let (critical_tx, critical_rx) = mpsc::channel::<Message>(64);
    let writer_handle = tokio::spawn(run_writer(sink, normal_rx, critical_rx));

    let outbox = Outbox { normal_tx, critical_tx, shutdown: shutdown.clone() };
    let mut session = ClientSession::new();
    let (control_tx, mut control_rx) = mpsc::channel::<SessionControl>(32);
    let mut watcher_rx = ctx.watcher_events.subscribe();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Envelope>(&text) {
                            Ok(env) => handle_message(&mut session, &ctx, &outbox, &control_tx, env).await,
                            Err(e) => outbox.send_critical(&Envelope::error("error", format!("malformed envelope: {e}"))),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Binary(bytes))) => {
                        match cse_wire::decode_binary_frame(&bytes) {
                            Ok(frame) => debug!(
                                agent = %frame.agent_name,
                                msg_type = frame.msg_type,
                                bytes = frame.payload.len(),
                                "session: binary frame decoded (file-upload passthrough; no sibling adapter in this workspace to forward to)"
                            ),
                            Err(e) => warn!(error = %e, "session: malformed binary frame"),
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "session: websocket read error");
                        break;
                    }
                }
            }
            event = watcher_rx.recv() => {
                match event {
                    Ok(event) => handle_watcher_event(&mut session, &ctx, &outbox, &control_tx, event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "session: lagged watcher event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            control = control_rx.recv() => {
                if let Some(control) = control {
                    handle_control(&mut session, &ctx, &outbox, control);
                } else {
                    break;
                }
            }
        }
    }

    cleanup_session(&mut session, &ctx);
    drop(outbox);
    let _ = writer_handle.await;
}

async fn run_writer(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut normal_rx: mpsc::Receiver<Message>,
    mut critical_rx: mpsc::Receiver<Message>,
) {
    loop {
        let msg = tokio::select! {
            biased;
            msg = critical_rx.recv() => msg,
            msg = normal_rx.recv() => msg,
        };
        let Some(msg) = msg else { break };
        match tokio::time::timeout(write_timeout(), sink.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "session: websocket write failed");
                break;
            }
            Err(_) => {
                warn!("session: websocket write timed out");
                break;
            }
        }
    }
    let _ = sink.close().await;
}

async fn handle_message(
    session: &mut ClientSession,
    ctx: &Arc<ServerContext>,
    outbox: &Outbox,
    control_tx: &mpsc::Sender<SessionControl>,
    env: Envelope,
) {
    let reply_id = env.id.clone();

    if !session.handshake_done {
        if env.kind == "hello" {
            session.handshake_done = true;
            outbox.send_critical(&Envelope {
                id: reply_id,
                ok: Some(true),
                protocol: Some(crate::context::PROTOCOL_VERSION.to_string()),
                server_version: Some(ServerContext::server_version().to_string()),
                ..Envelope::new("hello")
            });
        } else {
            outbox.send_critical(&Envelope {
                id: reply_id,
                ..Envelope::error("error", format!("handshake required before '{}'", env.kind))
            });
        }
        return;
    }

    match env.kind.as_str() {
        "hello" => {
            outbox.send_critical(&Envelope { id: reply_id, ..Envelope::error("error", "handshake already completed") });
        }
        "list-agents" => {
            let agents = ctx.registry.snapshot();
            let summaries: Vec<AgentSummary> = agents.iter().map(|a| to_summary(a, ctx)).collect();
            outbox.send_critical(&Envelope {
                id: reply_id,
                agents: Some(summaries.clone()),
                total_agents: Some(summaries.len()),
                ..Envelope::new("agents")
            });
        }
        "subscribe-agents" => match AgentFilter::compile(&env) {
            Ok(filter) => {
                let count = ctx.registry.snapshot().iter().filter(|a| filter.matches(a)).count();
                session.agent_filter = filter;
                session.agents_subscribed = true;
                outbox.send_critical(&Envelope {
                    id: reply_id,
                    total_agents: Some(count),
                    ..Envelope::new("agents-count")
                });
            }
            Err(e) => outbox.send_critical(&Envelope {
                id: reply_id,
                ..Envelope::error("error", format!("invalid filter: {e}"))
            }),
        },
        "list-conversations" => {
            let conversations = ctx
                .registry
                .snapshot()
                .into_iter()
                .filter_map(|a| {
                    ctx.watcher.conversation_for_agent(&a.name).map(|conversation_id| {
                        cse_wire::ConversationSummary { conversation_id, agent_name: a.name, runtime: a.runtime }
                    })
                })
                .collect();
            outbox.send_critical(&Envelope {
                id: reply_id,
                conversations: Some(conversations),
                ..Envelope::new("conversations")
            });
        }
        "subscribe-conversation" => {
            handle_subscribe_conversation(session, ctx, outbox, control_tx, env).await;
        }
        "follow-agent" => {
            handle_follow_agent(session, ctx, outbox, control_tx, env).await;
        }
        "unsubscribe" => {
            let Some(id) = env.subscription_id else {
                outbox.send_critical(&Envelope { id: reply_id, ..Envelope::error("error", "subscriptionId required") });
                return;
            };
            if let Some(entry) = session.subs.remove(&id) {
                teardown_sub(ctx, &entry);
                if let Some(agent) = &entry.agent_name {
                    session.follows.remove(agent);
                }
            }
            outbox.send_critical(&Envelope {
                id: reply_id,
                ok: Some(true),
                subscription_id: Some(id),
                ..Envelope::new("unsubscribe")
            });
        }
        "unsubscribe-agent" => {
            let Some(agent) = env.agent.clone() else {
                outbox.send_critical(&Envelope { id: reply_id, ..Envelope::error("error", "agent required") });
                return;
            };
            if let Some(id) = session.follows.remove(&agent) {
                if let Some(entry) = session.subs.remove(&id) {
                    teardown_sub(ctx, &entry);
                }
            } else if session.pending_follows.remove(&agent).is_some() {
                ctx.watcher.release_tailing(&agent);
            }
            outbox.send_critical(&Envelope {
                id: reply_id,
                ok: Some(true),
                agent: Some(agent),
                ..Envelope::new("unsubscribe-agent")
            });
        }
        "send-prompt" => {
            let (Some(agent), Some(prompt)) = (env.agent.clone(), env.prompt.clone()) else {
                outbox.send_critical(&Envelope {
                    id: reply_id,
                    ..Envelope::error("error", "agent and prompt required")
                });
                return;
            };
            match ctx.prompter.send_prompt(&agent, &prompt).await {
                Ok(()) => outbox.send_critical(&Envelope {
                    id: reply_id,
                    ok: Some(true),
                    agent: Some(agent),
                    ..Envelope::new("send-prompt")
                }),
                Err(e) => outbox.send_critical(&Envelope { id: reply_id, ..Envelope::error("error", e.to_string()) }),
            }
        }
        other => {
            outbox.send_critical(&Envelope {
                id: reply_id,
                ok: Some(false),
                unknown_type: Some(other.to_string()),
                error: Some(format!("unknown message type: {other}")),
                ..Envelope::new("error")
            });
        }
    }
}

async fn handle_subscribe_conversation(
    session: &mut ClientSession,
    ctx: &Arc<ServerContext>,
    outbox: &Outbox,
    control_tx: &mpsc::Sender<SessionControl>,
    env: Envelope,
) {
    let message_id = env.id.clone();
    let Some(conversation_id) = env.conversation_id.clone() else {
        outbox.send_critical(&Envelope { id: message_id, ..Envelope::error("error", "conversationId required") });
        return;
    };
    let filter = env.filter.clone().unwrap_or_default();

    let agent_name = agent_name_from_conversation_id(&conversation_id)
        .map(str::to_string)
        .or_else(|| ctx.watcher.agent_for_conversation(&conversation_id));
    let Some(agent_name) = agent_name else {
        outbox.send_critical(&Envelope {
            id: message_id,
            ..Envelope::error("error", "cannot resolve agent for conversation")
        });
        return;
    };
    if ctx.watcher.ensure_tailing(&agent_name).await.is_err() {
        outbox.send_critical(&Envelope { id: message_id, ..Envelope::error("error", "unknown agent") });
        return;
    }

    if let Some(buffer) = ctx.watcher.buffer_for(&conversation_id) {
        let subscription_id = session.next_id();
        start_stream(
            session,
            outbox,
            subscription_id,
            conversation_id,
            Some(agent_name),
            buffer,
            filter,
            message_id,
            None,
        );
        return;
    }

    let subscription_id = session.next_id();
    session.register_pending_conv(conversation_id, agent_name, subscription_id, filter, message_id, control_tx.clone());
}

async fn handle_follow_agent(
    session: &mut ClientSession,
    ctx: &Arc<ServerContext>,
    outbox: &Outbox,
    control_tx: &mpsc::Sender<SessionControl>,
    env: Envelope,
) {
    let message_id = env.id.clone();
    let Some(agent_name) = env.agent.clone() else {
        outbox.send_critical(&Envelope { id: message_id, ..Envelope::error("error", "agent required") });
        return;
    };
    let filter = env.filter.clone().unwrap_or_default();

    if let Some(old_sub) = session.follows.remove(&agent_name) {
        if let Some(entry) = session.subs.remove(&old_sub) {
            teardown_sub(ctx, &entry);
        }
    } else if session.pending_follows.remove(&agent_name).is_some() {
        ctx.watcher.release_tailing(&agent_name);
    }

    if ctx.watcher.ensure_tailing(&agent_name).await.is_err() {
        outbox.send_critical(&Envelope { id: message_id, ..Envelope::error("error", "unknown agent") });
        return;
    }

    let conversation_supported = ctx.watcher.conversation_for_agent(&agent_name).is_some();
    if let Some(conversation_id) = ctx.watcher.conversation_for_agent(&agent_name) {
        if let Some(buffer) = ctx.watcher.buffer_for(&conversation_id) {
            let subscription_id = session.next_id();
            outbox.send_critical(&Envelope {
                id: message_id.clone(),
                ok: Some(true),
                subscription_id: Some(subscription_id),
                conversation_id: Some(conversation_id.clone()),
                ..Envelope::new("follow-agent")
            });
            start_stream(session, outbox, subscription_id, conversation_id, Some(agent_name), buffer, filter, None, None);
            return;
        }
    }

    let subscription_id = session.next_id();
    outbox.send_critical(&Envelope {
        id: message_id,
        ok: Some(true),
        subscription_id: Some(subscription_id),
        conversation_supported: Some(conversation_supported),
        ..Envelope::new("follow-agent")
    });
    session.register_pending_follow(agent_name, subscription_id, filter, control_tx.clone());
}

#[allow(clippy::too_many_arguments)]
fn start_stream(
    session: &mut ClientSession,
    outbox: &Outbox,
    subscription_id: u64,
    conversation_id: String,
    agent_name: Option<String>,
    buffer: Arc<Buffer>,
    filter: EventFilter,
    reply_id: Option<String>,
    reason: Option<String>,
) {
    let stored_filter = filter.clone();
    let (snapshot, sub) = buffer.snapshot_and_subscribe(filter);
    let cancel = CancellationToken::new();

    session.subs.insert(
        subscription_id,
        SubEntry {
            conversation_id: conversation_id.clone(),
            agent_name: agent_name.clone(),
            buffer_sub_id: sub.id,
            worker_cancel: cancel.clone(),
            filter: stored_filter,
        },
    );
    if let Some(agent) = &agent_name {
        session.follows.insert(agent.clone(), subscription_id);
    }

    outbox.send_critical(&Envelope {
        id: reply_id,
        ok: Some(true),
        subscription_id: Some(subscription_id),
        conversation_id: Some(conversation_id.clone()),
        reason,
        ..Envelope::new("conversation-snapshot")
    });

    spawn_stream_worker(subscription_id, conversation_id, buffer, snapshot, sub, cancel, outbox.clone());
}

fn spawn_stream_worker(
    subscription_id: u64,
    conversation_id: String,
    buffer: Arc<Buffer>,
    snapshot: Vec<ConversationEvent>,
    mut sub: Subscription,
    cancel: CancellationToken,
    outbox: Outbox,
) {
    tokio::spawn(async move {
        let total = snapshot.len();
        let mut loaded = 0usize;
        for chunk in snapshot.chunks(SNAPSHOT_CHUNK_SIZE) {
            loaded += chunk.len();
            outbox.send_critical(&Envelope {
                subscription_id: Some(subscription_id),
                conversation_id: Some(conversation_id.clone()),
                events: Some(chunk.iter().cloned().map(WireEvent::from).collect()),
                progress: Some(Progress { loaded, total: Some(total) }),
                ..Envelope::new("conversation-snapshot-chunk")
            });
        }
        if total == 0 {
            outbox.send_critical(&Envelope {
                subscription_id: Some(subscription_id),
                conversation_id: Some(conversation_id.clone()),
                events: Some(Vec::new()),
                progress: Some(Progress { loaded: 0, total: Some(0) }),
                ..Envelope::new("conversation-snapshot-chunk")
            });
        }

        let mut history_done_rx = buffer.subscribe_history_done();
        if *history_done_rx.borrow() {
            outbox.send_critical(&Envelope {
                subscription_id: Some(subscription_id),
                conversation_id: Some(conversation_id.clone()),
                ..Envelope::new("conversation-snapshot-end")
            });
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = history_done_rx.changed() => {
                    if changed.is_ok() && *history_done_rx.borrow() {
                        outbox.send_critical(&Envelope {
                            subscription_id: Some(subscription_id),
                            conversation_id: Some(conversation_id.clone()),
                            ..Envelope::new("conversation-snapshot-end")
                        });
                    }
                }
                maybe_event = sub.rx.recv() => {
                    match maybe_event {
                        Some(event) => outbox.send_normal(&Envelope {
                            subscription_id: Some(subscription_id),
                            conversation_id: Some(conversation_id.clone()),
                            event: Some(WireEvent::from(event)),
                            ..Envelope::new("conversation-event")
                        }),
                        None => break,
                    }
                }
            }
        }
        buffer.unsubscribe(sub.id);
    });
}

fn handle_watcher_event(
    session: &mut ClientSession,
    ctx: &Arc<ServerContext>,
    outbox: &Outbox,
    control_tx: &mpsc::Sender<SessionControl>,
    event: WatcherEvent,
) {
    match event {
        WatcherEvent::AgentAdded(agent) => {
            if session.agents_subscribed && session.agent_filter.matches(&agent) {
                outbox.send_critical(&agent_envelope("agent-added", &agent, ctx));
            }
        }
        WatcherEvent::AgentRemoved(name) => {
            if session.agents_subscribed {
                outbox.send_critical(&Envelope { name: Some(name), ..Envelope::new("agent-removed") });
            }
        }
        WatcherEvent::AgentUpdated(agent) => {
            if session.agents_subscribed && session.agent_filter.matches(&agent) {
                outbox.send_critical(&agent_envelope("agent-updated", &agent, ctx));
            }
        }
        WatcherEvent::ConversationStarted { .. } | WatcherEvent::ConversationEvent { .. } => {
            resolve_pending(session, ctx, outbox);
        }
        WatcherEvent::ConversationSwitched { agent, from, to } => {
            handle_conversation_switched(session, ctx, outbox, control_tx, agent, from, to);
            resolve_pending(session, ctx, outbox);
        }
    }
}

/// S3 "rotation mid-stream": an agent the client actively follows has
/// rotated to a new conversation file. Tear the old subscription down
/// without releasing the agent's tailing ref (the agent is still
/// followed, only its active conversation changed), announce the
/// switch, then resume streaming against the new buffer — or fall back
/// to a pending follow if the new buffer has not materialized yet.
fn handle_conversation_switched(
    session: &mut ClientSession,
    ctx: &Arc<ServerContext>,
    outbox: &Outbox,
    control_tx: &mpsc::Sender<SessionControl>,
    agent: String,
    from: String,
    to: String,
) {
    let Some(subscription_id) = session.follows.get(&agent).copied() else { return };
    let Some(entry) = session.subs.remove(&subscription_id) else { return };

    entry.worker_cancel.cancel();
    if let Some(old_buffer) = ctx.watcher.buffer_for(&from) {
        old_buffer.unsubscribe(entry.buffer_sub_id);
    }

    outbox.send_critical(&Envelope { from: Some(from), to: Some(to.clone()), ..Envelope::new("conversation-switched") });

    if let Some(buffer) = ctx.watcher.buffer_for(&to) {
        start_stream(
            session,
            outbox,
            subscription_id,
            to,
            Some(agent),
            buffer,
            entry.filter,
            None,
            Some("switch".to_string()),
        );
    } else {
        session.register_pending_follow(agent, subscription_id, entry.filter, control_tx.clone());
    }
}

fn handle_control(session: &mut ClientSession, ctx: &Arc<ServerContext>, outbox: &Outbox, control: SessionControl) {
    match control {
        SessionControl::PendingConvTimedOut(conversation_id) => {
            if let Some(pending) = session.pending_conv_subs.remove(&conversation_id) {
                outbox.send_critical(&Envelope::error("error", "timed out waiting for conversation to appear"));
                ctx.watcher.release_tailing(&pending.agent_name);
            }
        }
        SessionControl::PendingFollowTimedOut(agent_name) => {
            if session.pending_follows.remove(&agent_name).is_some() {
                outbox.send_critical(&Envelope::error("error", "timed out waiting for conversation to appear"));
                ctx.watcher.release_tailing(&agent_name);
            }
        }
    }
}

fn resolve_pending(session: &mut ClientSession, ctx: &Arc<ServerContext>, outbox: &Outbox) {
    let ready_convs: Vec<String> =
        session.pending_conv_subs.keys().filter(|cid| ctx.watcher.buffer_for(cid).is_some()).cloned().collect();
    for conversation_id in ready_convs {
        if let Some(pending) = session.pending_conv_subs.remove(&conversation_id) {
            if let Some(buffer) = ctx.watcher.buffer_for(&conversation_id) {
                start_stream(
                    session,
                    outbox,
                    pending.subscription_id,
                    conversation_id,
                    Some(pending.agent_name),
                    buffer,
                    pending.filter,
                    pending.message_id,
                    None,
                );
            }
        }
    }

    let ready_agents: Vec<String> = session
        .pending_follows
        .keys()
        .filter(|agent| ctx.watcher.conversation_for_agent(agent).is_some())
        .cloned()
        .collect();
    for agent_name in ready_agents {
        if let Some(pending) = session.pending_follows.remove(&agent_name) {
            if let Some(conversation_id) = ctx.watcher.conversation_for_agent(&agent_name) {
                if let Some(buffer) = ctx.watcher.buffer_for(&conversation_id) {
                    start_stream(
                        session,
                        outbox,
                        pending.subscription_id,
                        conversation_id,
                        Some(agent_name),
                        buffer,
                        pending.filter,
                        None,
                        None,
                    );
                }
            }
        }
    }
}

fn teardown_sub(ctx: &Arc<ServerContext>, entry: &SubEntry) {
    entry.worker_cancel.cancel();
    if let Some(buffer) = ctx.watcher.buffer_for(&entry.conversation_id) {
        buffer.unsubscribe(entry.buffer_sub_id);
    }
    if let Some(agent) = &entry.agent_name {
        ctx.watcher.release_tailing(agent);
    }
}

/// Disconnect cleanup iterates `subs` only: `follows` is just a
/// name-to-subscription-id index into it, so tearing down every `subs`
/// entry already releases every followed agent's tailing refcount.
fn cleanup_session(session: &mut ClientSession, ctx: &Arc<ServerContext>) {
    for (_, entry) in session.subs.drain() {
        teardown_sub(ctx, &entry);
    }
    session.follows.clear();

    for (_, pending) in session.pending_conv_subs.drain() {
        ctx.watcher.release_tailing(&pending.agent_name);
    }
    for agent_name in session.pending_follows.keys().cloned().collect::<Vec<_>>() {
        ctx.watcher.release_tailing(&agent_name);
    }
    session.pending_follows.clear();
}

fn to_summary(agent: &Agent, ctx: &Arc<ServerContext>) -> AgentSummary {
    AgentSummary {
        name: agent.name.clone(),
        runtime: agent.runtime,
        work_dir: agent.work_dir.display().to_string(),
        attached: agent.attached,
        conversation_id: ctx.watcher.conversation_for_agent(&agent.name),
    }
}

fn agent_envelope(kind: &str, agent: &Agent, ctx: &Arc<ServerContext>) -> Envelope {
    Envelope { agents: Some(vec![to_summary(agent, ctx)]), ..Envelope::new(kind) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    use async_trait::async_trait;
    use cse_core::ids::conversation_id;
    use cse_core::test_support::{test_agent, MockRegistry};
    use cse_core::Runtime;
    use cse_prompter::PrompterError;
    use cse_watcher::NullHintResolver;
    use serial_test::serial;
    use tempfile::TempDir;

    struct NoopPrompter;

    #[async_trait]
    impl cse_prompter::Prompter for NoopPrompter {
        async fn send_prompt(&self, _agent_name: &str, _text: &str) -> Result<(), PrompterError> {
            Ok(())
        }
    }

    /// Points `$HOME` at a fresh tempdir for the duration of the guard so
    /// `ClaudeDiscoverer` resolves conversation files under it. Caller
    /// must hold `#[serial]` since `HOME` is process-global.
    struct HomeGuard {
        _dir: TempDir,
    }

    impl HomeGuard {
        fn new() -> (Self, std::path::PathBuf) {
            let dir = tempfile::tempdir().expect("tempdir");
            let path = dir.path().to_path_buf();
            std::env::set_var("HOME", &path);
            (Self { _dir: dir }, path)
        }
    }

    fn project_dir(home: &std::path::Path, work_dir: &str) -> std::path::PathBuf {
        let slug = work_dir.replace(['/', '.'], "-");
        home.join(".claude").join("projects").join(slug)
    }

    fn test_ctx(registry: Arc<MockRegistry>) -> (Arc<ServerContext>, broadcast::Receiver<WatcherEvent>) {
        let (watcher_tx, mut watcher_rx) = mpsc::channel::<WatcherEvent>(256);
        let (fanout_tx, fanout_rx) = broadcast::channel::<WatcherEvent>(256);
        let fanout = fanout_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = watcher_rx.recv().await {
                let _ = fanout.send(event);
            }
        });

        let watcher = ConversationWatcher::new(registry.clone(), Arc::new(NullHintResolver), watcher_tx, 1000);
        let ctx = Arc::new(ServerContext {
            registry,
            watcher,
            prompter: Arc::new(NoopPrompter),
            watcher_events: fanout_tx,
            auth_token: String::new(),
            debug_serve_dir: None,
        });
        (ctx, fanout_rx)
    }

    fn test_outbox() -> (Outbox, mpsc::Receiver<Message>, mpsc::Receiver<Message>) {
        let (normal_tx, normal_rx) = mpsc::channel(64);
        let (critical_tx, critical_rx) = mpsc::channel(64);
        let outbox = Outbox { normal_tx, critical_tx, shutdown: CancellationToken::new() };
        (outbox, normal_rx, critical_rx)
    }

    fn text_of(env: &Message) -> Envelope {
        match env {
            Message::Text(text) => serde_json::from_str(text).expect("valid envelope json"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    /// Feeds every watcher event observed within `idle` of the last one
    /// through `handle_watcher_event`, mirroring `run`'s event loop so
    /// async appends/discovery triggered off a just-written file have
    /// settled before assertions run.
    async fn drain_watcher_events(
        session: &mut ClientSession,
        ctx: &Arc<ServerContext>,
        outbox: &Outbox,
        control_tx: &mpsc::Sender<SessionControl>,
        rx: &mut broadcast::Receiver<WatcherEvent>,
        idle: Duration,
    ) {
        loop {
            match tokio::time::timeout(idle, rx.recv()).await {
                Ok(Ok(event)) => handle_watcher_event(session, ctx, outbox, control_tx, event),
                _ => break,
            }
        }
    }

    const S1_LINE: &str =
        r#"{"type":"user","uuid":"u1","timestamp":"2026-02-14T01:44:54.253Z","message":{"role":"user","content":[{"type":"text","text":"hello"}]}}"#;

    #[tokio::test]
    #[serial]
    async fn subscribe_conversation_streams_ordered_snapshot_once_file_appears() {
        let (_home, home_path) = HomeGuard::new();
        let work_dir = "/tmp/conv-work";
        let dir = project_dir(&home_path, work_dir);
        fs::create_dir_all(&dir).expect("create project dir");

        let registry = Arc::new(MockRegistry::new());
        registry.upsert(test_agent("conv-agent", Runtime::Claude, work_dir));
        let (ctx, mut watcher_events) = test_ctx(registry);
        let (outbox, _normal_rx, mut critical_rx) = test_outbox();
        let (control_tx, _control_rx) = mpsc::channel(8);
        let mut session = ClientSession::new();
        session.handshake_done = true;

        let conversation_id = conversation_id(Runtime::Claude, "conv-agent", "test");
        let request = Envelope {
            id: Some("1".to_string()),
            conversation_id: Some(conversation_id.clone()),
            ..Envelope::new("subscribe-conversation")
        };
        handle_subscribe_conversation(&mut session, &ctx, &outbox, &control_tx, request).await;
        assert_eq!(session.pending_conv_subs.len(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        fs::write(dir.join("test.jsonl"), format!("{S1_LINE}\n")).expect("write conversation file");

        drain_watcher_events(&mut session, &ctx, &outbox, &control_tx, &mut watcher_events, Duration::from_secs(2)).await;

        let snapshot = tokio::time::timeout(Duration::from_secs(2), critical_rx.recv())
            .await
            .expect("snapshot header arrives")
            .map(|m| text_of(&m))
            .expect("channel open");
        assert_eq!(snapshot.kind, "conversation-snapshot");
        assert_eq!(snapshot.id.as_deref(), Some("1"));
        assert_eq!(snapshot.conversation_id.as_deref(), Some(conversation_id.as_str()));
        assert_eq!(snapshot.subscription_id, Some(1));

        let chunk = tokio::time::timeout(Duration::from_secs(2), critical_rx.recv())
            .await
            .expect("snapshot chunk arrives")
            .map(|m| text_of(&m))
            .expect("channel open");
        assert_eq!(chunk.kind, "conversation-snapshot-chunk");
        let events = chunk.events.expect("events present");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].role.as_deref(), Some("user"));
        match &events[0].content[..] {
            [cse_core::ContentBlock::Text { text }] => assert_eq!(text, "hello"),
            other => panic!("unexpected content blocks: {other:?}"),
        }

        let end = tokio::time::timeout(Duration::from_secs(2), critical_rx.recv())
            .await
            .expect("snapshot end arrives")
            .map(|m| text_of(&m))
            .expect("channel open");
        assert_eq!(end.kind, "conversation-snapshot-end");
        assert!(session.pending_conv_subs.is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn conversation_rotation_mid_stream_tears_down_old_sub_and_restarts_on_new_buffer() {
        let (_home, home_path) = HomeGuard::new();
        let work_dir = "/tmp/rot-work";
        let dir = project_dir(&home_path, work_dir);
        fs::create_dir_all(&dir).expect("create project dir");
        fs::write(dir.join("conv1.jsonl"), format!("{S1_LINE}\n")).expect("write first conversation file");

        let registry = Arc::new(MockRegistry::new());
        registry.upsert(test_agent("rot-agent", Runtime::Claude, work_dir));
        let (ctx, mut watcher_events) = test_ctx(registry);
        let (outbox, _normal_rx, mut critical_rx) = test_outbox();
        let (control_tx, _control_rx) = mpsc::channel(8);
        let mut session = ClientSession::new();
        session.handshake_done = true;

        let follow = Envelope { id: Some("f1".to_string()), agent: Some("rot-agent".to_string()), ..Envelope::new("follow-agent") };
        handle_follow_agent(&mut session, &ctx, &outbox, &control_tx, follow).await;

        // Immediate follow-agent ack, sent before the conversation is discovered.
        let ack = tokio::time::timeout(Duration::from_secs(2), critical_rx.recv())
            .await
            .expect("follow ack arrives")
            .map(|m| text_of(&m))
            .expect("channel open");
        assert_eq!(ack.kind, "follow-agent");
        assert_eq!(ack.id.as_deref(), Some("f1"));

        drain_watcher_events(&mut session, &ctx, &outbox, &control_tx, &mut watcher_events, Duration::from_secs(2)).await;

        let conv1_id = conversation_id(Runtime::Claude, "rot-agent", "conv1");
        let snapshot = tokio::time::timeout(Duration::from_secs(2), critical_rx.recv())
            .await
            .expect("conv1 snapshot header arrives")
            .map(|m| text_of(&m))
            .expect("channel open");
        assert_eq!(snapshot.kind, "conversation-snapshot");
        assert_eq!(snapshot.conversation_id.as_deref(), Some(conv1_id.as_str()));
        let _chunk = critical_rx.recv().await.expect("conv1 chunk");
        let _end = critical_rx.recv().await.expect("conv1 snapshot end");

        tokio::time::sleep(Duration::from_millis(200)).await;
        let second_line = S1_LINE.replace("u1", "u2").replace("hello", "world");
        fs::write(dir.join("conv2.jsonl"), format!("{second_line}\n")).expect("write rotated conversation file");

        drain_watcher_events(&mut session, &ctx, &outbox, &control_tx, &mut watcher_events, Duration::from_secs(2)).await;

        let conv2_id = conversation_id(Runtime::Claude, "rot-agent", "conv2");
        let switched = tokio::time::timeout(Duration::from_secs(2), critical_rx.recv())
            .await
            .expect("conversation-switched arrives")
            .map(|m| text_of(&m))
            .expect("channel open");
        assert_eq!(switched.kind, "conversation-switched");
        assert_eq!(switched.from.as_deref(), Some(conv1_id.as_str()));
        assert_eq!(switched.to.as_deref(), Some(conv2_id.as_str()));

        let new_snapshot = tokio::time::timeout(Duration::from_secs(2), critical_rx.recv())
            .await
            .expect("conv2 snapshot header arrives")
            .map(|m| text_of(&m))
            .expect("channel open");
        assert_eq!(new_snapshot.kind, "conversation-snapshot");
        assert_eq!(new_snapshot.conversation_id.as_deref(), Some(conv2_id.as_str()));
        assert_eq!(new_snapshot.reason.as_deref(), Some("switch"));

        let new_chunk = tokio::time::timeout(Duration::from_secs(2), critical_rx.recv())
            .await
            .expect("conv2 chunk arrives")
            .map(|m| text_of(&m))
            .expect("channel open");
        let events = new_chunk.events.expect("events present");
        match &events[0].content[..] {
            [cse_core::ContentBlock::Text { text }] => assert_eq!(text, "world"),
            other => panic!("unexpected content blocks: {other:?}"),
        }

        assert_eq!(session.follows.len(), 1, "rotated sub stays registered under the same follow");
    }

    #[tokio::test]
    #[serial]
    async fn follow_agent_before_any_file_exists_streams_once_conversation_starts() {
        let (_home, home_path) = HomeGuard::new();
        let work_dir = "/tmp/follow-work";
        let dir = project_dir(&home_path, work_dir);
        fs::create_dir_all(&dir).expect("create project dir");

        let registry = Arc::new(MockRegistry::new());
        registry.upsert(test_agent("follow-agent", Runtime::Claude, work_dir));
        let (ctx, mut watcher_events) = test_ctx(registry);
        let (outbox, _normal_rx, mut critical_rx) = test_outbox();
        let (control_tx, _control_rx) = mpsc::channel(8);
        let mut session = ClientSession::new();
        session.handshake_done = true;

        let follow =
            Envelope { id: Some("f2".to_string()), agent: Some("follow-agent".to_string()), ..Envelope::new("follow-agent") };
        handle_follow_agent(&mut session, &ctx, &outbox, &control_tx, follow).await;
        assert_eq!(session.pending_follows.len(), 1);

        let ack = tokio::time::timeout(Duration::from_secs(2), critical_rx.recv())
            .await
            .expect("follow ack arrives")
            .map(|m| text_of(&m))
            .expect("channel open");
        assert_eq!(ack.kind, "follow-agent");
        assert_eq!(ack.ok, Some(true));
        assert_eq!(ack.conversation_supported, Some(false));
        assert!(ack.conversation_id.is_none());

        tokio::time::sleep(Duration::from_millis(150)).await;
        fs::write(dir.join("test.jsonl"), format!("{S1_LINE}\n")).expect("write conversation file");

        drain_watcher_events(&mut session, &ctx, &outbox, &control_tx, &mut watcher_events, Duration::from_secs(2)).await;

        let expected_id = conversation_id(Runtime::Claude, "follow-agent", "test");
        let snapshot = tokio::time::timeout(Duration::from_secs(2), critical_rx.recv())
            .await
            .expect("snapshot header arrives")
            .map(|m| text_of(&m))
            .expect("channel open");
        assert_eq!(snapshot.kind, "conversation-snapshot");
        assert_eq!(snapshot.conversation_id.as_deref(), Some(expected_id.as_str()));
        assert_eq!(snapshot.subscription_id, ack.subscription_id);

        let chunk = tokio::time::timeout(Duration::from_secs(2), critical_rx.recv())
            .await
            .expect("chunk arrives")
            .map(|m| text_of(&m))
            .expect("channel open");
        assert_eq!(chunk.kind, "conversation-snapshot-chunk");
        let _end = tokio::time::timeout(Duration::from_secs(2), critical_rx.recv())
            .await
            .expect("end arrives")
            .map(|m| text_of(&m))
            .expect("channel open");

        assert!(session.pending_follows.is_empty());
        assert_eq!(session.follows.get("follow-agent").copied(), ack.subscription_id);
    }
}
