// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer-token check for the `/ws` upgrade (§6.2). An empty configured
//! token disables auth entirely; a configured token is compared in
//! constant time so response latency can't leak how many prefix bytes
//! matched.

use subtle::ConstantTimeEq;

/// Extracts a bearer token from either an `Authorization: Bearer <token>`
/// header value or a `token=` query-string parameter.
pub fn extract_token(authorization_header: Option<&str>, query: Option<&str>) -> Option<String> {
    if let Some(header) = authorization_header {
        if let Some(token) = header.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    let query = query?;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("token=") {
            return Some(value.to_string());
        }
    }
    None
}

/// Returns `true` if access is permitted: either no token is configured,
/// or the presented token matches in constant time.
pub fn is_authorized(configured_token: &str, presented: Option<&str>) -> bool {
    if configured_token.is_empty() {
        return true;
    }
    match presented {
        Some(token) => configured_token.as_bytes().ct_eq(token.as_bytes()).into(),
        None => false,
    }
}
