// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subset of the on-disk record shape emitted by a Gemini-like runtime
//! (R3): a single JSON document rewritten wholesale on every update, no
//! resume hint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GeminiSession {
    pub session_id: String,
    #[serde(default)]
    pub messages: Vec<GeminiMessage>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "lowercase")]
pub enum GeminiMessage {
    User(UserMessage),
    Gemini(GeminiAssistantMessage),
    Info(InfoMessage),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UserMessage {
    pub id: String,
    pub timestamp: String,
    pub content: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GeminiAssistantMessage {
    pub id: String,
    pub timestamp: String,
    pub content: String,
    pub model: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tokens: Option<TokenUsage>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InfoMessage {
    pub id: String,
    pub timestamp: String,
    pub content: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
    #[serde(default)]
    pub result_display: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    #[serde(default)]
    pub cached: u64,
}
