// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Claude-like runtime (R1): append-only JSONL with a `--resume <id>`
//! hint.

mod discover;
mod mapper;
mod schema;

pub use discover::ClaudeDiscoverer;
pub use mapper::{ClaudeParser, ClaudeParserFactory};
