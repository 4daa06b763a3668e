// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cse-buffer: the per-conversation event buffer. Owns sequence
//! assignment, a bounded ring of history, live fan-out to subscribers and
//! the history-done signal (§4.C).

mod buffer;

pub use buffer::{Buffer, EventsSinceResult, Subscription};
