// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use cse_core::{ContentBlock, ConversationEvent, EventKind, Runtime, TokenUsage};

use crate::parser::{Parser, ParserError, ParserFactory};

use super::schema::{AssistantContent, ClaudeRecord, UserContent};

pub struct ClaudeParserFactory;

impl ParserFactory for ClaudeParserFactory {
    fn create(&self, agent_name: &str, conversation_id: &str) -> Box<dyn Parser> {
        Box::new(ClaudeParser {
            agent_name: agent_name.to_string(),
            conversation_id: conversation_id.to_string(),
            synth_counter: 0,
        })
    }
}

pub struct ClaudeParser {
    agent_name: String,
    conversation_id: String,
    synth_counter: u64,
}

impl ClaudeParser {
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
            runtime: Runtime::Claude,
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

impl Parser for ClaudeParser {
    fn parse(&mut self, raw: &[u8]) -> Result<Vec<ConversationEvent>, ParserError> {
        let record: ClaudeRecord = match serde_json::from_slice(raw) {
            Ok(r) => r,
            Err(e) => {
                let id = self.next_synth_id();
                let ts = chrono::Utc::now().to_rfc3339();
                return Ok(vec![ConversationEvent::parse_error(
                    self.conversation_id.clone(),
                    self.agent_name.clone(),
                    Runtime::Claude,
                    id,
                    ts,
                    e.to_string(),
                )]);
            }
        };

        let events = match record {
            ClaudeRecord::FileHistorySnapshot(_) | ClaudeRecord::Unknown => Vec::new(),
            ClaudeRecord::User(user) => {
                if user.is_meta {
                    return Ok(Vec::new());
                }
                let mut ev = self.base(user.uuid.clone(), user.timestamp.clone(), EventKind::User);
                ev.role = Some("user".to_string());
                ev.parent_event_id = user.parent_uuid.clone();
                let has_tool_result =
                    user.message.content.iter().any(|c| matches!(c, UserContent::ToolResult { .. }));
                if has_tool_result {
                    ev.kind = EventKind::ToolResult;
                }
                for c in user.message.content {
                    match c {
                        UserContent::Text { text } => {
                            ev.content.push(ContentBlock::Text { text })
                        }
                        UserContent::ToolResult { tool_use_id, content, is_error } => {
                            let output = match content {
                                serde_json::Value::String(s) => s,
                                other => other.to_string(),
                            };
                            ev.content.push(ContentBlock::ToolResult {
                                tool_id: tool_use_id,
                                output,
                                is_error,
                            });
                        }
                        UserContent::Unknown => {}
                    }
                }
                vec![ev.truncated()]
            }
            ClaudeRecord::Assistant(asst) => {
                let mut ev =
                    self.base(asst.uuid.clone(), asst.timestamp.clone(), EventKind::Assistant);
                ev.role = Some("assistant".to_string());
                ev.parent_event_id = asst.parent_uuid.clone();
                ev.model = Some(asst.message.model.clone());
                ev.request_id = asst.request_id.clone();
                ev.token_usage = asst.message.usage.map(|u| TokenUsage {
                    input: u.input_tokens,
                    output: u.output_tokens,
                    cache_read: u.cache_read_input_tokens,
                    cache_create: u.cache_creation_input_tokens,
                });
                for c in asst.message.content {
                    match c {
                        AssistantContent::Text { text } => {
                            ev.content.push(ContentBlock::Text { text })
                        }
                        AssistantContent::Thinking { thinking } => {
                            ev.content.push(ContentBlock::Thinking { text: thinking })
                        }
                        AssistantContent::ToolUse { id, name, input } => {
                            ev.content.push(ContentBlock::ToolUse { id, name, raw_input: input })
                        }
                        AssistantContent::ToolResult { tool_use_id, content, is_error } => {
                            ev.content.push(ContentBlock::ToolResult {
                                tool_id: tool_use_id,
                                output: content,
                                is_error,
                            })
                        }
                        AssistantContent::Unknown => {}
                    }
                }
                vec![ev.truncated()]
            }
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

    fn parser() -> ClaudeParser {
        ClaudeParser {
            agent_name: "a".into(),
            conversation_id: "claude:a:1".into(),
            synth_counter: 0,
        }
    }

    #[test]
    fn parses_user_text_record() {
        let mut p = parser();
        let line = br#"{"type":"user","uuid":"u1","parentUuid":null,"timestamp":"2026-01-01T00:00:00Z","message":{"content":"hello"}}"#;
        let events = p.parse(line).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::User);
        assert!(matches!(&events[0].content[0], ContentBlock::Text { text } if text == "hello"));
    }

    #[test]
    fn malformed_json_yields_error_event_not_err() {
        let mut p = parser();
        let events = p.parse(b"not json").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Error);
    }

    #[test]
    fn meta_user_messages_are_skipped() {
        let mut p = parser();
        let line = br#"{"type":"user","uuid":"u1","parentUuid":null,"timestamp":"2026-01-01T00:00:00Z","isMeta":true,"message":{"content":"hi"}}"#;
        let events = p.parse(line).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn assistant_tool_use_is_preserved_raw() {
        let mut p = parser();
        let line = br#"{"type":"assistant","uuid":"a1","parentUuid":"u1","timestamp":"2026-01-01T00:00:01Z","message":{"model":"claude-x","content":[{"type":"tool_use","id":"t1","name":"bash","input":{"cmd":"ls"}}]}}"#;
        let events = p.parse(line).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0].content[0], ContentBlock::ToolUse { name, .. } if name == "bash"));
    }
}
