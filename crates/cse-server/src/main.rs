// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Entrypoint: parse flags, stand up the registry/watcher/prompter
//! trio, accept connections, and shut down cleanly on SIGINT/SIGTERM
//! (§6.4).

mod auth;
mod config;
mod context;
mod http;
mod registry;
mod session;

use std::sync::Arc;

use clap::Parser;
use cse_core::config::{buffer_capacity, LIVE_CHANNEL_CAPACITY};
use cse_prompter::TmuxPrompter;
use cse_watcher::{ConversationWatcher, NullHintResolver, WatcherEvent};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use config::{CliArgs, StartupError};
use context::ServerContext;
use registry::TmuxRegistry;

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match run(cli).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "cse-server: fatal startup error");
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: CliArgs) -> Result<(), StartupError> {
    let listener = TcpListener::bind(cli.listen).await.map_err(|e| StartupError::Bind(cli.listen, e))?;
    info!(addr = %cli.listen, "cse-server: listening");

    let agent_registry = TmuxRegistry::spawn(cli.gt_dir.clone());

    let (watcher_tx, mut watcher_rx) = mpsc::channel::<WatcherEvent>(LIVE_CHANNEL_CAPACITY);
    let (fanout_tx, _fanout_rx) = broadcast::channel::<WatcherEvent>(LIVE_CHANNEL_CAPACITY);
    let fanout = fanout_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = watcher_rx.recv().await {
            let _ = fanout.send(event);
        }
    });

    let watcher = ConversationWatcher::new(
        agent_registry.clone(),
        Arc::new(NullHintResolver),
        watcher_tx,
        buffer_capacity(),
    );

    let auth_token = std::env::var("CSE_AUTH_TOKEN").unwrap_or_default();
    let ctx = Arc::new(ServerContext {
        registry: agent_registry,
        watcher,
        prompter: Arc::new(TmuxPrompter::new()),
        watcher_events: fanout_tx,
        auth_token,
        debug_serve_dir: cli.debug_serve_dir.clone(),
    });

    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| StartupError::Registry(e.to_string()))?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("cse-server: received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("cse-server: received SIGTERM, shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            http::handle_connection(stream, ctx).await;
                        });
                        tracing::debug!(%peer, "cse-server: accepted connection");
                    }
                    Err(e) => warn!(error = %e, "cse-server: accept failed"),
                }
            }
        }
    }

    Ok(())
}
