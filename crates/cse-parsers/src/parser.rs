// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-record parser contract (§4.E). A `Parser` never returns a
//! transport error for malformed input — it synthesizes an `error`-kind
//! event instead, so one bad line never kills a stream.

use cse_core::ConversationEvent;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("parser internal fault: {0}")]
    Internal(String),
}

pub trait Parser: Send {
    /// Decode one raw record. For append-only runtimes this is a single
    /// JSONL line; for full-document runtimes this is one line of a
    /// rewritten-wholesale document, buffered internally until a full
    /// decode succeeds (§4.E).
    fn parse(&mut self, raw: &[u8]) -> Result<Vec<ConversationEvent>, ParserError>;

    /// Clear buffered state and dedup memory. Called on explicit buffer
    /// reinitialization only, never on ordinary truncation handling.
    fn reset(&mut self);
}

pub trait ParserFactory: Send + Sync {
    fn create(&self, agent_name: &str, conversation_id: &str) -> Box<dyn Parser>;
}
