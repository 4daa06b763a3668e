// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use cse_core::{ContentBlock, ConversationEvent, EventKind, Runtime};
use serde_json::Value;

use crate::parser::{Parser, ParserError, ParserFactory};

use super::schema::{CodexRecord, MessageContent, ResponseItemPayload};

pub struct CodexParserFactory;

impl ParserFactory for CodexParserFactory {
    fn create(&self, agent_name: &str, conversation_id: &str) -> Box<dyn Parser> {
        Box::new(CodexParser {
            agent_name: agent_name.to_string(),
            conversation_id: conversation_id.to_string(),
            synth_counter: 0,
        })
    }
}

pub struct CodexParser {
    agent_name: String,
    conversation_id: String,
    synth_counter: u64,
}

impl CodexParser {
    fn next_synth_id(&mut self) -> String {
        self.synth_counter += 1;
        format!("{}#synth-{}", self.agent_name, self.synth_counter)
    }

    fn base(&self, event_id: String, timestamp: String, kind: EventKind) -> ConversationEvent {
        ConversationEvent {
            seq: 0,
            event_id,
            conversation_id: self.conversation_id.clone(),
            agent_name: self.agent_name.clone(),
            runtime: Runtime::Codex,
            timestamp,
            kind,
            role: None,
            content: Vec::new(),
            model: None,
            token_usage: None,
            request_id: None,
            parent_event_id: None,
            metadata: Default::default(),
        }
    }
}

impl Parser for CodexParser {
    fn parse(&mut self, raw: &[u8]) -> Result<Vec<ConversationEvent>, ParserError> {
        let record: CodexRecord = match serde_json::from_slice(raw) {
            Ok(r) => r,
            Err(e) => {
                let id = self.next_synth_id();
                let ts = chrono::Utc::now().to_rfc3339();
                return Ok(vec![ConversationEvent::parse_error(
                    self.conversation_id.clone(),
                    self.agent_name.clone(),
                    Runtime::Codex,
                    id,
                    ts,
                    e.to_string(),
                )]);
            }
        };

        let events = match record {
            CodexRecord::SessionMeta(_) | CodexRecord::Unknown => Vec::new(),
            CodexRecord::ResponseItem(item) => match item.payload {
                ResponseItemPayload::Message(msg) => {
                    let kind = if msg.role == "user" { EventKind::User } else { EventKind::Assistant };
                    let id = self.next_synth_id();
                    let mut ev = self.base(id, item.timestamp, kind);
                    ev.role = Some(msg.role);
                    for c in msg.content {
                        match c {
                            MessageContent::InputText { text } | MessageContent::OutputText { text } => {
                                ev.content.push(ContentBlock::Text { text })
                            }
                            MessageContent::Unknown => {}
                        }
                    }
                    vec![ev.truncated()]
                }
                ResponseItemPayload::Reasoning(r) => {
                    let id = self.next_synth_id();
                    let mut ev = self.base(id, item.timestamp, EventKind::Thinking);
                    if let Some(text) = r.content {
                        ev.content.push(ContentBlock::Thinking { text });
                    }
                    vec![ev.truncated()]
                }
                ResponseItemPayload::FunctionCall(call) => {
                    let mut ev =
                        self.base(call.call_id.clone(), item.timestamp, EventKind::ToolUse);
                    let raw_input: Value =
                        serde_json::from_str(&call.arguments).unwrap_or(Value::Null);
                    ev.content.push(ContentBlock::ToolUse {
                        id: call.call_id,
                        name: call.name,
                        raw_input,
                    });
                    vec![ev]
                }
                ResponseItemPayload::FunctionCallOutput(out) => {
                    let event_id = format!("{}#result", out.call_id);
                    let mut ev = self.base(event_id, item.timestamp, EventKind::ToolResult);
                    ev.content.push(ContentBlock::ToolResult {
                        tool_id: out.call_id,
                        output: out.output,
                        is_error: false,
                    });
                    vec![ev.truncated()]
                }
                ResponseItemPayload::Unknown => Vec::new(),
            },
        };

        Ok(events)
    }

    fn reset(&mut self) {
        self.synth_counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> CodexParser {
        CodexParser { agent_name: "a".into(), conversation_id: "codex:a:1".into(), synth_counter: 0 }
    }

    #[test]
    fn parses_user_message() {
        let mut p = parser();
        let line = br#"{"type":"response_item","timestamp":"2026-01-01T00:00:00Z","payload":{"type":"message","role":"user","content":[{"type":"input_text","text":"hi"}]}}"#;
        let events = p.parse(line).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::User);
    }

    #[test]
    fn function_call_and_output_round_trip_ids() {
        let mut p = parser();
        let call = br#"{"type":"response_item","timestamp":"t","payload":{"type":"function_call","name":"bash","arguments":"{\"cmd\":\"ls\"}","call_id":"c1"}}"#;
        let out = br#"{"type":"response_item","timestamp":"t","payload":{"type":"function_call_output","call_id":"c1","output":"done"}}"#;
        let call_events = p.parse(call).unwrap();
        let out_events = p.parse(out).unwrap();
        assert_eq!(call_events[0].event_id, "c1");
        assert_eq!(out_events[0].event_id, "c1#result");
    }

    #[test]
    fn unknown_record_kind_produces_no_events() {
        let mut p = parser();
        let line = br#"{"type":"turn_context"}"#;
        assert!(p.parse(line).unwrap().is_empty());
    }
}
