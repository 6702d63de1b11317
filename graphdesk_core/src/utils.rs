use std::collections::HashSet;
use std::future::Future;

use once_cell::sync::Lazy;
use regex::Regex;
use rmcp::model::CallToolResult;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::ConnectorError;

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T, C> {
    pub items: Vec<T>,
    pub next_cursor: Option<C>,
}

/// Items gathered across pages, plus the cursor to resume from (if any).
#[derive(Debug, Clone)]
pub struct Collected<T, C> {
    pub items: Vec<T>,
    pub next_cursor: Option<C>,
    pub requests: usize,
}

/// Drives `fetch` page by page until `desired` items are collected, the source
/// runs out of pages, or `max_requests` is hit. Items whose `key` was already
/// seen are dropped, so overlapping pages never produce duplicates.
pub async fn collect_paginated_with_cursor<T, C, F, Fut, K>(
    desired: usize,
    max_requests: usize,
    start: Option<C>,
    mut fetch: F,
    key: K,
) -> Result<Collected<T, C>, ConnectorError>
where
    F: FnMut(Option<C>, usize) -> Fut,
    Fut: Future<Output = Result<Page<T, C>, ConnectorError>>,
    K: Fn(&T) -> Option<String>,
{
    let mut items: Vec<T> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut cursor = start;
    let mut requests = 0usize;

    while items.len() < desired && requests < max_requests {
        let remaining = desired - items.len();
        let page = fetch(cursor.take(), remaining).await?;
        requests += 1;

        for item in page.items {
            if let Some(k) = key(&item) {
                if !seen.insert(k) {
                    continue;
                }
            }
            items.push(item);
        }

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    items.truncate(desired);
    Ok(Collected {
        items,
        next_cursor: cursor,
        requests,
    })
}

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex"));
static STYLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(style|script)[^>]*>.*?</(style|script)>").expect("style regex")
});
static BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<\s*(br|/p|/div|/tr|/li)\s*/?>").expect("break regex"));

/// Reduces an HTML mail body to readable plain text.
pub fn html_to_text(html: &str) -> String {
    let without_blocks = STYLE_RE.replace_all(html, "");
    let with_breaks = BREAK_RE.replace_all(&without_blocks, "\n");
    let stripped = TAG_RE.replace_all(&with_breaks, "");
    let decoded = clean_html_entities(&stripped);
    strip_multiple_newlines(
        &decoded
            .lines()
            .map(|l| l.trim_end())
            .collect::<Vec<_>>()
            .join("\n"),
    )
    .trim()
    .to_string()
}

pub fn clean_html_entities(text: &str) -> String {
    let mut cleaned = text.to_string();
    // Double-encoded entities show up in forwarded mail.
    for _ in 0..2 {
        let decoded = html_escape::decode_html_entities(&cleaned).into_owned();
        if decoded == cleaned {
            break;
        }
        cleaned = decoded;
    }
    cleaned.replace('\u{a0}', " ")
}

pub fn strip_multiple_newlines(text: &str) -> String {
    let mut result = String::new();
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !result.is_empty() {
            result.push('\n');
        }
        result.push_str(line);
    }
    result
}

/// Cuts `text` to at most `max` characters on a char boundary, appending `...`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

const RESULT_LIST_KEYS: &[&str] = &[
    "messages",
    "events",
    "meetings",
    "files",
    "transcript",
    "attendees",
    "records",
    "themes",
    "senders",
    "organizers",
    "results",
    "items",
    "data",
];

const QUERY_FIELD_KEYS: &[&str] = &["query", "sender", "subject", "organizer", "title", "path"];

fn build_no_results_message(key: &str, query_hint: Option<String>) -> String {
    let label = match key {
        "data" | "results" | "items" => "results".to_string(),
        other => other.replace('_', " "),
    };
    match query_hint {
        Some(query) => format!("No {} found for \"{}\".", label, query),
        None => format!("No {} found for the requested input.", label),
    }
}

fn maybe_attach_no_results_message(map: &mut JsonMap<String, JsonValue>) -> Option<String> {
    let query_hint = map
        .iter()
        .find_map(|(key, value)| {
            if QUERY_FIELD_KEYS.iter().any(|candidate| candidate == key) {
                value.as_str().map(|s| s.trim().to_string())
            } else {
                None
            }
        })
        .filter(|s| !s.is_empty());

    let mut message = None;
    for key in RESULT_LIST_KEYS {
        match map.get(*key) {
            Some(JsonValue::Array(items)) if items.is_empty() => {
                message = Some(build_no_results_message(key, query_hint.clone()));
                break;
            }
            Some(JsonValue::Array(_)) => return None,
            _ => {}
        }
    }

    if let Some(text) = message.clone() {
        map.entry("message".to_string())
            .or_insert(JsonValue::String(text));
        map.entry("no_results".to_string())
            .or_insert(JsonValue::Bool(true));
    }
    message
}

/// Build a CallToolResult that carries structured JSON. Empty result lists get
/// a human-readable `message` and `no_results: true`.
pub fn structured_result_with_text<T: Serialize>(
    data: &T,
    _text_fallback: Option<String>,
) -> Result<CallToolResult, ConnectorError> {
    let value = serde_json::to_value(data).map_err(|e| ConnectorError::Other(e.to_string()))?;

    // Non-object payloads are wrapped under `data`.
    let mut map: JsonMap<String, JsonValue> = match value {
        JsonValue::Object(m) => m,
        other => {
            let mut m = JsonMap::new();
            m.insert("data".to_string(), other);
            m
        }
    };

    maybe_attach_no_results_message(&mut map);

    Ok(CallToolResult {
        content: Vec::new(),
        structured_content: Some(JsonValue::Object(map)),
        is_error: Some(false),
        meta: None,
    })
}
