// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cse-tail: append-follows one file with rotation/truncation detection,
//! separating "historical read finished" from "live tail" (§4.B).

mod tailer;

pub use tailer::{spawn_tail, TailLine, TailMode};
