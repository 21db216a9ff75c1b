//! Heuristic extraction of auth material from captured traffic.
//!
//! The browser extension reports raw response headers and bodies; these
//! functions scan them for cookie and token values worth keeping. The
//! matching is substring-based over fixed keyword lists, last occurrence
//! wins, and there is no guarantee against false positives. That is the
//! accepted behavior: the goal is "catch the obvious session material",
//! not a correct cookie parser.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// A cookie key is kept when its lowercased name contains one of these.
const COOKIE_KEYWORDS: [&str; 4] = ["session", "token", "auth", "jwt"];

/// A JSON body field is kept when its lowercased key contains one of these
/// and its string value is longer than [`MIN_TOKEN_LEN`] characters.
const TOKEN_KEYWORDS: [&str; 5] = ["token", "access", "refresh", "auth", "bearer"];

const MIN_TOKEN_LEN: usize = 10;

fn matches_any(key: &str, keywords: &[&str]) -> bool {
    let lower = key.to_lowercase();
    keywords.iter().any(|kw| lower.contains(kw))
}

/// Render a header value to text. Extensions send strings mostly, but some
/// report arrays of Set-Cookie lines; those are joined with `;` so the
/// splitting below sees every pair.
fn header_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}

/// Scan response headers for `Set-Cookie` material.
///
/// The header value is split on `;`; each `k=v` chunk (split on the first
/// `=`, value truncated at the next `;`) is kept when the key matches the
/// cookie keyword list. Cookie attributes like `Path` or `Expires` fall out
/// naturally because their names do not match.
pub fn extract_cookies(response_headers: &Map<String, Value>) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    let raw = response_headers
        .get("set-cookie")
        .or_else(|| response_headers.get("Set-Cookie"));
    let raw = match raw {
        Some(v) => header_text(v),
        None => return cookies,
    };

    for chunk in raw.split(';') {
        if let Some((key, value)) = chunk.split_once('=') {
            let key = key.trim();
            let value = value.split(';').next().unwrap_or("").trim();
            if matches_any(key, &COOKIE_KEYWORDS) {
                cookies.insert(key.to_string(), value.to_string());
            }
        }
    }
    cookies
}

/// Scan a response body for token-looking JSON fields.
///
/// Only top-level string values of a JSON object are considered; anything
/// that is not a JSON object yields nothing. Short values are skipped to
/// avoid keeping flags like `"auth": "ok"`.
pub fn extract_tokens(response_body: &str) -> HashMap<String, String> {
    let mut tokens = HashMap::new();
    if response_body.is_empty() {
        return tokens;
    }
    let parsed: Value = match serde_json::from_str(response_body) {
        Ok(v) => v,
        Err(_) => return tokens,
    };
    if let Value::Object(map) = parsed {
        for (key, value) in map {
            if let Value::String(s) = value {
                if s.len() > MIN_TOKEN_LEN && matches_any(&key, &TOKEN_KEYWORDS) {
                    tokens.insert(key, s);
                }
            }
        }
    }
    tokens
}
