// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The thin HTTP surface (§6.2): `/healthz`, `/readyz`, `/conversations`,
//! and the `/ws` upgrade. No HTTP server crate — the request line and
//! headers are read directly off the `TcpStream`, matching the rest of
//! this codebase's preference for a direct `tokio::process`/socket style
//! over a framework layer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cse_wire::ConversationSummary;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::warn;

use crate::auth::{extract_token, is_authorized};
use crate::context::ServerContext;

const PEEK_BUF_SIZE: usize = 8192;

pub async fn handle_connection(mut stream: TcpStream, ctx: Arc<ServerContext>) {
    let mut peek_buf = [0u8; PEEK_BUF_SIZE];
    let n = match stream.peek(&mut peek_buf).await {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let head = String::from_utf8_lossy(&peek_buf[..n]).to_string();
    let mut lines = head.lines();

    let Some(request_line) = lines.next() else {
        respond_plain(&mut stream, 400, "Bad Request").await;
        return;
    };
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let raw_target = parts.next().unwrap_or("/");
    let (path, query) = raw_target.split_once('?').map(|(p, q)| (p, Some(q))).unwrap_or((raw_target, None));

    if method != "GET" {
        respond_plain(&mut stream, 405, "Method Not Allowed").await;
        return;
    }

    match path {
        "/healthz" => respond_json(&mut stream, 200, r#"{"ok":true}"#).await,
        "/readyz" => respond_json(&mut stream, 200, r#"{"ok":true}"#).await,
        "/conversations" => {
            let body = conversations_json(&ctx);
            respond_json(&mut stream, 200, &body).await;
        }
        "/ws" => handle_ws_upgrade(stream, &ctx, &head, query).await,
        other => {
            if let Some(dir) = &ctx.debug_serve_dir {
                serve_static(&mut stream, dir, other).await;
            } else {
                respond_plain(&mut stream, 404, "Not Found").await;
            }
        }
    }
}

async fn handle_ws_upgrade(stream: TcpStream, ctx: &Arc<ServerContext>, head: &str, query: Option<&str>) {
    let authorization = head.lines().find_map(|l| {
        l.split_once(':').and_then(|(name, value)| {
            name.eq_ignore_ascii_case("authorization").then(|| value.trim().to_string())
        })
    });
    let token = extract_token(authorization.as_deref(), query);

    if !is_authorized(&ctx.auth_token, token.as_deref()) {
        let mut stream = stream;
        respond_plain(&mut stream, 401, "Unauthorized").await;
        return;
    }

    match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => crate::session::run(ws, ctx.clone()).await,
        Err(e) => warn!(error = %e, "http: websocket handshake failed"),
    }
}

fn conversations_json(ctx: &Arc<ServerContext>) -> String {
    let conversations: Vec<ConversationSummary> = ctx
        .registry
        .snapshot()
        .into_iter()
        .filter_map(|a| {
            ctx.watcher
                .conversation_for_agent(&a.name)
                .map(|conversation_id| ConversationSummary { conversation_id, agent_name: a.name, runtime: a.runtime })
        })
        .collect();
    serde_json::to_string(&conversations).unwrap_or_else(|_| "[]".to_string())
}

async fn serve_static(stream: &mut TcpStream, root: &Path, request_path: &str) {
    let relative = request_path.trim_start_matches('/');
    if relative.split('/').any(|segment| segment == "..") {
        respond_plain(stream, 400, "Bad Request").await;
        return;
    }
    let resolved: PathBuf = root.join(if relative.is_empty() { "index.html" } else { relative });

    match tokio::fs::read(&resolved).await {
        Ok(bytes) => {
            let content_type = content_type_for(&resolved);
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n",
                len = bytes.len()
            );
            let _ = stream.write_all(header.as_bytes()).await;
            let _ = stream.write_all(&bytes).await;
        }
        Err(_) => respond_plain(stream, 404, "Not Found").await,
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

async fn respond_json(stream: &mut TcpStream, status: u16, body: &str) {
    respond(stream, status, "application/json", body.as_bytes()).await;
}

async fn respond_plain(stream: &mut TcpStream, status: u16, body: &str) {
    respond(stream, status, "text/plain", body.as_bytes()).await;
}

async fn respond(stream: &mut TcpStream, status: u16, content_type: &str, body: &[u8]) {
    let status_text = status_text(status);
    let header = format!(
        "HTTP/1.1 {status} {status_text}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n",
        len = body.len()
    );
    let _ = stream.write_all(header.as_bytes()).await;
    let _ = stream.write_all(body).await;
    let _ = stream.flush().await;
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_is_derived_from_extension() {
        assert_eq!(content_type_for(Path::new("app.js")), "application/javascript");
        assert_eq!(content_type_for(Path::new("index.html")), "text/html; charset=utf-8");
        assert_eq!(content_type_for(Path::new("data.bin")), "application/octet-stream");
    }

    #[test]
    fn status_text_covers_known_codes() {
        assert_eq!(status_text(200), "OK");
        assert_eq!(status_text(404), "Not Found");
    }
}
