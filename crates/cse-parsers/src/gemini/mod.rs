// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gemini-like runtime (R3): full-document JSON, no resume hint.

mod discover;
mod mapper;
mod schema;

pub use discover::GeminiDiscoverer;
pub use mapper::{GeminiParser, GeminiParserFactory};
