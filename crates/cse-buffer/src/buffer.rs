// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A bounded ring of `ConversationEvent`s plus live fan-out (§4.C).
//!
//! `snapshot_and_subscribe` is the one operation every caller must use to
//! join a conversation in progress: it takes the lock once, so no event
//! can land between "read the backlog" and "start receiving new ones".

use std::collections::{HashMap, VecDeque};

use cse_core::config::LIVE_CHANNEL_CAPACITY;
use cse_core::{ConversationEvent, EventFilter};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::warn;

struct Subscriber {
    tx: mpsc::Sender<ConversationEvent>,
    filter: EventFilter,
}

struct Inner {
    events: VecDeque<ConversationEvent>,
    capacity: usize,
    next_seq: u64,
    subscribers: HashMap<u64, Subscriber>,
    next_sub_id: u64,
}

impl Inner {
    /// Lowest seq a caller could still retrieve via `events_since`, or
    /// `next_seq` if nothing has been appended yet.
    fn oldest_available(&self) -> u64 {
        self.events.front().map(|e| e.seq).unwrap_or(self.next_seq)
    }
}

/// The per-conversation buffer. One instance per conversation id, held by
/// the watcher for the conversation's lifetime.
pub struct Buffer {
    inner: Mutex<Inner>,
    history_done_tx: watch::Sender<bool>,
}

/// A live subscription returned by `snapshot_and_subscribe`.
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<ConversationEvent>,
}

/// Result of a backlog replay request (§4.G.3 resume-by-cursor).
pub struct EventsSinceResult {
    pub events: Vec<ConversationEvent>,
    /// True when the requested cursor falls before the oldest event this
    /// buffer still retains; the caller must fall back to a full resync.
    pub gap: bool,
}

impl Buffer {
    pub fn new(capacity: usize) -> Self {
        let (history_done_tx, _rx) = watch::channel(false);
        Self {
            inner: Mutex::new(Inner {
                events: VecDeque::new(),
                capacity: capacity.max(1),
                next_seq: 1,
                subscribers: HashMap::new(),
                next_sub_id: 1,
            }),
            history_done_tx,
        }
    }

    /// Assign the next seq, append, evict if over capacity, and fan out to
    /// every subscriber whose filter matches. Never blocks on a slow
    /// subscriber (§8 S5): a full channel drops the event for that
    /// subscriber only.
    pub fn append(&self, event: ConversationEvent) -> ConversationEvent {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let mut ev = event;
        ev.seq = seq;

        inner.events.push_back(ev.clone());
        if inner.events.len() > inner.capacity {
            inner.events.pop_front();
        }

        inner.subscribers.retain(|_, sub| {
            if !sub.filter.matches(&ev) {
                return true;
            }
            match sub.tx.try_send(ev.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(conversation_seq = seq, "buffer: subscriber channel full, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        ev
    }

    /// Atomically read the backlog matching `filter` and register a live
    /// subscription so no event appended after this call is missed or
    /// duplicated.
    pub fn snapshot_and_subscribe(&self, filter: EventFilter) -> (Vec<ConversationEvent>, Subscription) {
        let mut inner = self.inner.lock();
        let snapshot: Vec<ConversationEvent> =
            inner.events.iter().filter(|e| filter.matches(e)).cloned().collect();

        let id = inner.next_sub_id;
        inner.next_sub_id += 1;
        let (tx, rx) = mpsc::channel(LIVE_CHANNEL_CAPACITY);
        inner.subscribers.insert(id, Subscriber { tx, filter });

        (snapshot, Subscription { id, rx })
    }

    /// Remove a subscriber; its receiver drains whatever is already queued
    /// then observes the channel close.
    pub fn unsubscribe(&self, id: u64) {
        self.inner.lock().subscribers.remove(&id);
    }

    /// Replay every event with `seq > after_seq` matching `filter`, for a
    /// client resuming from a cursor (§4.G.3).
    pub fn events_since(&self, after_seq: u64, filter: &EventFilter) -> EventsSinceResult {
        let inner = self.inner.lock();
        let oldest = inner.oldest_available();
        let gap = oldest > after_seq + 1 && oldest > 1;
        let events = inner
            .events
            .iter()
            .filter(|e| e.seq > after_seq && filter.matches(e))
            .cloned()
            .collect();
        EventsSinceResult { events, gap }
    }

    /// Signal that the historical backlog has been fully replayed. Safe to
    /// call more than once; late subscribers still observe `true`.
    pub fn mark_history_done(&self) {
        let _ = self.history_done_tx.send(true);
    }

    pub fn history_done(&self) -> bool {
        *self.history_done_tx.borrow()
    }

    pub fn subscribe_history_done(&self) -> watch::Receiver<bool> {
        self.history_done_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
