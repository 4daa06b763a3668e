// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cse-parsers: the Discoverer/Parser contracts (§4.D, §4.E) plus the
//! three supported vendor implementations.

mod discoverer;
mod parser;

pub mod claude;
pub mod codex;
pub mod gemini;

pub use discoverer::{ConversationFile, Discoverer, DiscoveryResult};
pub use parser::{Parser, ParserError, ParserFactory};

use cse_core::Runtime;

/// Look up the Discoverer and ParserFactory for a runtime. Returns `None`
/// for a runtime nobody has registered a plugin for (§4.F step 1: "agent
/// is known but unstreamable").
pub fn discoverer_for(runtime: Runtime) -> Box<dyn Discoverer> {
    match runtime {
        Runtime::Claude => Box::new(claude::ClaudeDiscoverer::default()),
        Runtime::Codex => Box::new(codex::CodexDiscoverer::default()),
        Runtime::Gemini => Box::new(gemini::GeminiDiscoverer::default()),
    }
}

pub fn parser_factory_for(runtime: Runtime) -> Box<dyn ParserFactory> {
    match runtime {
        Runtime::Claude => Box::new(claude::ClaudeParserFactory),
        Runtime::Codex => Box::new(codex::CodexParserFactory),
        Runtime::Gemini => Box::new(gemini::GeminiParserFactory),
    }
}
