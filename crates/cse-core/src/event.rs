// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The normalized event schema every parser emits and every client
//! receives. Read-only after construction (§4.A) — nothing here mutates a
//! `ConversationEvent` once built; the buffer only assigns `seq`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::Runtime;

/// Every text/output field is truncated to this many bytes before it is
/// allowed into a buffer (§3, content size invariant).
pub const MAX_FIELD_BYTES: usize = 256 * 1024;

/// Truncate a string to at most `MAX_FIELD_BYTES`, respecting UTF-8
/// character boundaries so the result is always valid `str`.
pub fn truncate_field(s: &str) -> String {
    if s.len() <= MAX_FIELD_BYTES {
        return s.to_string();
    }
    let mut end = MAX_FIELD_BYTES;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Kind discriminant for a `ConversationEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    User,
    Assistant,
    System,
    ToolUse,
    ToolResult,
    Thinking,
    Progress,
    TurnEnd,
    QueueOp,
    Error,
}

/// Token accounting reported by the vendor, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(rename = "in", default)]
    pub input: u64,
    #[serde(rename = "out", default)]
    pub output: u64,
    #[serde(rename = "cacheRead", default)]
    pub cache_read: u64,
    #[serde(rename = "cacheCreate", default)]
    pub cache_create: u64,
}

/// One block of structured content within an event's payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Thinking { text: String },
    ToolUse {
        id: String,
        name: String,
        /// Raw JSON preserved verbatim, as received from the vendor.
        #[serde(rename = "rawInput")]
        raw_input: Value,
    },
    ToolResult {
        #[serde(rename = "toolId")]
        tool_id: String,
        output: String,
        #[serde(rename = "isError", default)]
        is_error: bool,
    },
}

impl ContentBlock {
    /// Apply the 256 KiB truncation invariant to every text-bearing field.
    pub fn truncated(self) -> Self {
        match self {
            ContentBlock::Text { text } => ContentBlock::Text { text: truncate_field(&text) },
            ContentBlock::Thinking { text } => {
                ContentBlock::Thinking { text: truncate_field(&text) }
            }
            ContentBlock::ToolResult { tool_id, output, is_error } => ContentBlock::ToolResult {
                tool_id,
                output: truncate_field(&output),
                is_error,
            },
            other @ ContentBlock::ToolUse { .. } => other,
        }
    }
}

/// The only type streamed to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEvent {
    /// Assigned on append by the buffer; monotonic per conversation.
    #[serde(default)]
    pub seq: u64,
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

impl ConversationEvent {
    /// Build an `error`-kind event for the parser contract in §4.E: parsers
    /// must never return a transport error for malformed input.
    pub fn parse_error(
        conversation_id: impl Into<String>,
        agent_name: impl Into<String>,
        runtime: Runtime,
        event_id: impl Into<String>,
        timestamp: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("errorKind".to_string(), Value::String("parse".to_string()));
        metadata.insert("reason".to_string(), Value::String(reason.into()));
        Self {
            seq: 0,
            event_id: event_id.into(),
            conversation_id: conversation_id.into(),
            agent_name: agent_name.into(),
            runtime,
            timestamp: timestamp.into(),
            kind: EventKind::Error,
            role: None,
            content: Vec::new(),
            model: None,
            token_usage: None,
            request_id: None,
            parent_event_id: None,
            metadata,
        }
    }

    /// Apply the truncation invariant to every content block (§3).
    pub fn truncated(mut self) -> Self {
        self.content = self.content.into_iter().map(ContentBlock::truncated).collect();
        self
    }
}
