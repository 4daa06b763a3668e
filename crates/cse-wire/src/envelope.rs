// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;

use cse_core::{ContentBlock, ConversationEvent, EventFilter, EventKind, Runtime, TokenUsage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One flat JSON object shape for every message in both directions
/// (§6.1). Unused fields are omitted on the wire via `skip_serializing_if`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unknown_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<EventFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_session_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_session_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_path_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_path_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<AgentSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_agents: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversations: Option<Vec<ConversationSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<WireEvent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<WireEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_supported: Option<bool>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), ..Default::default() }
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), ok: Some(false), error: Some(message.into()), ..Default::default() }
    }
}

/// `ConversationEvent` as placed on the wire. `seq` is buffer-internal
/// bookkeeping (§3) and is deliberately not a field here — stream position
/// is carried by `Cursor`, not leaked onto every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    pub event_id: String,
    pub conversation_id: String,
    pub agent_name: String,
    pub runtime: Runtime,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl From<ConversationEvent> for WireEvent {
    fn from(ev: ConversationEvent) -> Self {
        Self {
            event_id: ev.event_id,
            conversation_id: ev.conversation_id,
            agent_name: ev.agent_name,
            runtime: ev.runtime,
            timestamp: ev.timestamp,
            kind: ev.kind,
            role: ev.role,
            content: ev.content,
            model: ev.model,
            token_usage: ev.token_usage,
            request_id: ev.request_id,
            parent_event_id: ev.parent_event_id,
            metadata: ev.metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub name: String,
    pub runtime: Runtime,
    pub work_dir: String,
    pub attached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub agent_name: String,
    pub runtime: Runtime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Progress {
    pub loaded: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

/// `{c: conversationId, g: "", s: seq, e: eventId}` — the cursor placed
/// as a JSON-encoded string in `Envelope.cursor` (§9: "no server-side
/// re-anchoring from cursor is required").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
    pub c: String,
    #[serde(default)]
    pub g: String,
    pub s: u64,
    pub e: String,
}

impl Cursor {
    pub fn new(conversation_id: impl Into<String>, seq: u64, event_id: impl Into<String>) -> Self {
        Self { c: conversation_id.into(), g: String::new(), s: seq, e: event_id.into() }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_json() {
        let env = Envelope {
            id: Some("1".into()),
            kind: "hello".into(),
            ok: Some(true),
            protocol: Some("tmux-converter.v1".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, "hello");
        assert_eq!(back.ok, Some(true));
    }

    #[test]
    fn omitted_optional_fields_are_absent_from_json() {
        let env = Envelope::new("list-agents");
        let json = serde_json::to_value(&env).unwrap();
        assert!(json.get("ok").is_none());
        assert!(json.get("events").is_none());
    }

    #[test]
    fn filter_field_deserializes_from_client_shape() {
        let json = r#"{"type":"subscribe-conversation","conversationId":"claude:a:1","filter":{"excludeThinking":true}}"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        let filter = env.filter.expect("filter present");
        assert!(filter.exclude_thinking);
        let _ = EventKind::User;
    }

    #[test]
    fn wire_event_never_serializes_seq() {
        let event = ConversationEvent::parse_error(
            "claude:a:1",
            "a",
            Runtime::Claude,
            "e1",
            "2026-01-01T00:00:00Z",
            "boom",
        );
        let wire: WireEvent = event.into();
        let json = serde_json::to_value(&wire).unwrap();
        assert!(json.get("seq").is_none());
    }

    #[test]
    fn cursor_encodes_expected_shape() {
        let c = Cursor::new("claude:a:1", 7, "e7");
        let encoded = c.encode();
        assert!(encoded.contains("\"c\":\"claude:a:1\""));
        assert!(encoded.contains("\"s\":7"));
    }
}
