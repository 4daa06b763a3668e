// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `EventFilter` — a pure predicate over `ConversationEvent`s (§4.A:
//! `Filter.Matches` is pure).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::event::{ConversationEvent, EventKind};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<HashSet<EventKind>>,
    #[serde(default)]
    pub exclude_thinking: bool,
    #[serde(default)]
    pub exclude_progress: bool,
}

impl std::hash::Hash for EventKind {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (*self as u8).hash(state);
    }
}

impl EventFilter {
    /// True iff (`types` is empty or contains `e.kind`) and neither
    /// excluded kind applies.
    pub fn matches(&self, e: &ConversationEvent) -> bool {
        if let Some(types) = &self.types {
            if !types.is_empty() && !types.contains(&e.kind) {
                return false;
            }
        }
        if self.exclude_thinking && e.kind == EventKind::Thinking {
            return false;
        }
        if self.exclude_progress && e.kind == EventKind::Progress {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Runtime;

    fn event_of_kind(kind: EventKind) -> ConversationEvent {
        ConversationEvent {
            seq: 0,
            event_id: "e1".into(),
            conversation_id: "claude:a:1".into(),
            agent_name: "a".into(),
            runtime: Runtime::Claude,
            timestamp: "2026-01-01T00:00:00Z".into(),
            kind,
            role: None,
            content: vec![],
            model: None,
            token_usage: None,
            request_id: None,
            parent_event_id: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let f = EventFilter::default();
        assert!(f.matches(&event_of_kind(EventKind::User)));
        assert!(f.matches(&event_of_kind(EventKind::Thinking)));
    }

    #[test]
    fn types_filter_restricts_to_named_kinds() {
        let mut types = HashSet::new();
        types.insert(EventKind::User);
        let f = EventFilter { types: Some(types), ..Default::default() };
        assert!(f.matches(&event_of_kind(EventKind::User)));
        assert!(!f.matches(&event_of_kind(EventKind::Assistant)));
    }

    #[test]
    fn exclude_thinking_drops_thinking_regardless_of_types() {
        let f = EventFilter { exclude_thinking: true, ..Default::default() };
        assert!(!f.matches(&event_of_kind(EventKind::Thinking)));
    }

    #[test]
    fn exclude_progress_drops_progress() {
        let f = EventFilter { exclude_progress: true, ..Default::default() };
        assert!(!f.matches(&event_of_kind(EventKind::Progress)));
    }
}
