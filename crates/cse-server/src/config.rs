// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI flags (§6.4) and the process exit codes `main` maps errors onto.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

#[derive(Debug, Parser)]
#[command(name = "cse-server", about = "Conversation streaming engine for tmux-attached CLI agents")]
pub struct CliArgs {
    /// Only track agents whose working directory is under this path. Empty tracks all.
    #[arg(long = "gt-dir", visible_alias = "work-dir")]
    pub gt_dir: Option<PathBuf>,

    /// Address to bind the HTTP/WebSocket listener on.
    #[arg(long, default_value = "0.0.0.0:8081")]
    pub listen: SocketAddr,

    /// Optional static file root served for any request outside the known routes.
    #[arg(long = "debug-serve-dir")]
    pub debug_serve_dir: Option<PathBuf>,
}

/// Startup failures map to a non-zero exit code (§6.4, §7 "Fatal startup").
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {0}: {1}")]
    Bind(SocketAddr, std::io::Error),
    #[error("failed to initialize agent registry: {0}")]
    Registry(String),
}

impl StartupError {
    pub fn exit_code(&self) -> i32 {
        1
    }
}
