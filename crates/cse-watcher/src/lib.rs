// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cse-watcher: turns "an agent is known and a client asked to follow
//! it" into a running Discoverer → Tailer → Parser → Buffer pipeline,
//! and a channel of lifecycle events for the session layer (§4.F).

mod active_main;
mod hint;
mod watcher;

pub use active_main::select_active_main;
pub use hint::{NullHintResolver, ResumeHintResolver};
pub use watcher::{ConversationWatcher, WatcherEvent};
