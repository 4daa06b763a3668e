// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashSet;

use cse_core::{ContentBlock, ConversationEvent, EventKind, Runtime, TokenUsage};

use crate::parser::{Parser, ParserError, ParserFactory};

use super::schema::GeminiMessage;

pub struct GeminiParserFactory;

impl ParserFactory for GeminiParserFactory {
    fn create(&self, agent_name: &str, conversation_id: &str) -> Box<dyn Parser> {
        Box::new(GeminiParser {
            agent_name: agent_name.to_string(),
            conversation_id: conversation_id.to_string(),
            buffer: Vec::new(),
            seen: HashSet::new(),
        })
    }
}

/// Full-document parser: each `parse` call hands over one more line of the
/// current rewrite. Lines accumulate until the buffer decodes as a whole
/// `GeminiSession`; on success only unseen `eventId`s are emitted and the
/// buffer is cleared, ready to accumulate the next rewrite (§4.E).
pub struct GeminiParser {
    agent_name: String,
    conversation_id: String,
    buffer: Vec<u8>,
    seen: HashSet<String>,
}

impl GeminiParser {
    fn base(&self, event_id: String, timestamp: String, kind: EventKind) -> ConversationEvent {
        ConversationEvent {
            seq: 0,
            event_id,
            conversation_id: self.conversation_id.clone(),
            agent_name: self.agent_name.clone(),
            runtime: Runtime::Gemini,
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

    fn map_message(&mut self, msg: GeminiMessage) -> Option<ConversationEvent> {
        let ev = match msg {
            GeminiMessage::User(u) => {
                if self.seen.contains(&u.id) {
                    return None;
                }
                let mut ev = self.base(u.id.clone(), u.timestamp, EventKind::User);
                ev.role = Some("user".to_string());
                ev.content.push(ContentBlock::Text { text: u.content });
                self.seen.insert(u.id);
                ev
            }
            GeminiMessage::Gemini(g) => {
                if self.seen.contains(&g.id) {
                    return None;
                }
                let mut ev = self.base(g.id.clone(), g.timestamp, EventKind::Assistant);
                ev.role = Some("assistant".to_string());
                ev.model = Some(g.model);
                ev.content.push(ContentBlock::Text { text: g.content });
                for call in g.tool_calls {
                    ev.content.push(ContentBlock::ToolUse {
                        id: call.id,
                        name: call.name,
                        raw_input: call.args,
                    });
                }
                ev.token_usage = g.tokens.map(|t| TokenUsage {
                    input: t.input,
                    output: t.output,
                    cache_read: t.cached,
                    cache_create: 0,
                });
                self.seen.insert(g.id);
                ev
            }
            GeminiMessage::Info(i) => {
                if self.seen.contains(&i.id) {
                    return None;
                }
                let mut ev = self.base(i.id.clone(), i.timestamp, EventKind::System);
                ev.content.push(ContentBlock::Text { text: i.content });
                self.seen.insert(i.id);
                ev
            }
        };
        Some(ev.truncated())
    }
}

impl Parser for GeminiParser {
    fn parse(&mut self, raw: &[u8]) -> Result<Vec<ConversationEvent>, ParserError> {
        self.buffer.extend_from_slice(raw);
        self.buffer.push(b'\n');

        let session: super::schema::GeminiSession = match serde_json::from_slice(&self.buffer) {
            Ok(s) => s,
            Err(e) => {
                // Could be an incomplete rewrite still being written, or
                // genuinely malformed. Cap how long we wait before
                // surfacing it so a truly broken file doesn't buffer
                // forever.
                if self.buffer.len() > 32 * 1024 * 1024 {
                    let ts = chrono::Utc::now().to_rfc3339();
                    self.buffer.clear();
                    return Ok(vec![ConversationEvent::parse_error(
                        self.conversation_id.clone(),
                        self.agent_name.clone(),
                        Runtime::Gemini,
                        format!("{}#parse-error", self.agent_name),
                        ts,
                        e.to_string(),
                    )]);
                }
                return Ok(Vec::new());
            }
        };

        self.buffer.clear();
        let events = session
            .messages
            .into_iter()
            .filter_map(|m| self.map_message(m))
            .collect();
        Ok(events)
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> GeminiParser {
        GeminiParser {
            agent_name: "a".into(),
            conversation_id: "gemini:a:1".into(),
            buffer: Vec::new(),
            seen: HashSet::new(),
        }
    }

    #[test]
    fn decodes_once_document_is_complete() {
        let mut p = parser();
        let doc = br#"{"sessionId":"s1","messages":[{"type":"user","id":"m1","timestamp":"t","content":"hi"}]}"#;
        let events = p.parse(doc).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "m1");
    }

    #[test]
    fn rewrite_with_same_messages_does_not_duplicate() {
        let mut p = parser();
        let doc = br#"{"sessionId":"s1","messages":[{"type":"user","id":"m1","timestamp":"t","content":"hi"}]}"#;
        p.parse(doc).unwrap();
        let events = p.parse(doc).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn rewrite_with_additional_message_emits_only_the_new_one() {
        let mut p = parser();
        let doc1 = br#"{"sessionId":"s1","messages":[{"type":"user","id":"m1","timestamp":"t","content":"hi"}]}"#;
        let doc2 = br#"{"sessionId":"s1","messages":[{"type":"user","id":"m1","timestamp":"t","content":"hi"},{"type":"gemini","id":"m2","timestamp":"t2","content":"hello back","model":"gemini-x","toolCalls":[],"tokens":{"input":1,"output":2,"cached":0}}]}"#;
        p.parse(doc1).unwrap();
        let events = p.parse(doc2).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "m2");
    }
}
