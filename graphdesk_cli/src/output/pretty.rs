//! Pretty formatter for terminal output.
//!
//! Result lists render as numbered cards (subject line, dimmed metadata,
//! wrapped preview); count-style lists render as tables.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, ContentArrangement, Table};
use owo_colors::OwoColorize;
use serde_json::{Map, Value};

const DEFAULT_WIDTH: usize = 80;

/// Indent for card content (after the number).
const CARD_INDENT: usize = 6;

/// Keys holding result lists shown as cards, in priority order.
const LIST_KEYS: &[&str] = &[
    "messages",
    "events",
    "meetings",
    "files",
    "transcript",
    "attendees",
    "tools",
    "patterns",
];

/// Keys holding ranked or columnar lists shown as tables.
const TABLE_KEYS: &[(&str, &[&str])] = &[
    ("themes", &["word", "count"]),
    ("senders", &["name", "address", "count"]),
    ("organizers", &["name", "address", "count"]),
    ("records", &["name", "email", "role", "total_seconds"]),
    ("attempts", &["strategy", "status", "count", "reason", "error"]),
];

const TITLE_KEYS: &[&str] = &["subject", "name", "title", "speaker", "tool"];

const URL_KEYS: &[&str] = &["web_link", "join_url", "web_url", "verification_uri"];

const SNIPPET_KEYS: &[&str] = &["body", "preview", "text", "description", "example"];

/// Metadata shown dimmed under a card, handles first for follow-up commands.
const META_KEYS: &[&str] = &[
    "handle",
    "from",
    "to",
    "organizer",
    "sent",
    "received",
    "start",
    "end",
    "location",
    "email",
    "role",
    "response",
    "sources",
    "kind",
    "size",
    "modified",
    "attendees",
    "participants",
];

// ============================================================================
// Public API
// ============================================================================

pub fn format_pretty(value: &Value) -> String {
    let mut output = String::new();
    let width = terminal_width();
    format_value(value, &mut output, width);
    output
}

pub fn format_cards(items: &[Value], label: Option<&str>, width: usize) -> String {
    let mut output = String::new();
    if let Some(label) = label {
        output.push_str(&format_section_header(label, Some(items.len()), width));
        output.push('\n');
    }
    for (i, item) in items.iter().enumerate() {
        output.push_str(&format_card(item, i + 1, width));
        if i + 1 < items.len() {
            output.push('\n');
        }
    }
    output
}

// ============================================================================
// Core formatting
// ============================================================================

fn format_value(value: &Value, output: &mut String, width: usize) {
    match value {
        Value::Object(obj) => {
            let header: Vec<(&String, &Value)> = obj
                .iter()
                .filter(|(_, v)| !v.is_array() && !v.is_object())
                .collect();
            for (key, val) in &header {
                output.push_str(&format!("{}: {}\n", key.dimmed(), format_scalar(key, val)));
            }

            let mut shown_list = false;
            for (key, columns) in TABLE_KEYS {
                if let Some(Value::Array(arr)) = obj.get(*key) {
                    if !arr.is_empty() {
                        output.push('\n');
                        output.push_str(&format_section_header(key, Some(arr.len()), width));
                        output.push('\n');
                        output.push_str(&format_as_table(arr, columns));
                        shown_list = true;
                    }
                }
            }
            for key in LIST_KEYS {
                if let Some(Value::Array(arr)) = obj.get(*key) {
                    if !arr.is_empty() {
                        output.push('\n');
                        output.push_str(&format_cards(arr, Some(key), width));
                        shown_list = true;
                    }
                }
            }

            // Nested single objects (a fetched message, a meeting).
            for (key, val) in obj {
                if let Value::Object(inner) = val {
                    output.push('\n');
                    output.push_str(&format_section_header(key, None, width));
                    output.push('\n');
                    output.push_str(&format_card(&Value::Object(inner.clone()), 0, width));
                    shown_list = true;
                }
            }

            if !shown_list && header.is_empty() {
                output.push_str(&format!("{}\n", "(empty)".dimmed()));
            }
        }
        Value::Array(arr) if arr.iter().any(Value::is_object) => {
            output.push_str(&format_cards(arr, None, width));
        }
        Value::Array(arr) => {
            for item in arr {
                output.push_str(&format!("  {} {}\n", "•".dimmed(), format_scalar("", item)));
            }
        }
        other => output.push_str(&format_scalar("", other)),
    }
}

// ============================================================================
// Cards
// ============================================================================

fn format_card(item: &Value, index: usize, width: usize) -> String {
    let mut output = String::new();
    let Some(obj) = item.as_object() else {
        output.push_str(&format!("  {} {}\n", "•".dimmed(), format_scalar("", item)));
        return output;
    };

    let index_str = if index > 0 {
        format!(" {:>3}. ", index).cyan().bold().to_string()
    } else {
        " ".repeat(CARD_INDENT)
    };
    let title = find_field(obj, TITLE_KEYS)
        .or_else(|| obj.get("id").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "(no subject)".to_string());
    output.push_str(&format!("{}{}\n", index_str, title.bold()));

    let meta = extract_meta_fields(obj);
    if !meta.is_empty() {
        let line = meta
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join("  ");
        for wrapped in textwrap::wrap(&line, width.saturating_sub(CARD_INDENT).max(20)) {
            output.push_str(&format!("{}{}\n", " ".repeat(CARD_INDENT), wrapped.dimmed()));
        }
    }

    if let Some(u) = find_field(obj, URL_KEYS) {
        output.push_str(&format!("{}{}\n", " ".repeat(CARD_INDENT), format_hyperlink(&u).blue()));
    }

    if let Some(s) = find_field(obj, SNIPPET_KEYS) {
        let clean = clean_snippet(&s);
        if !clean.is_empty() {
            let options = textwrap::Options::new(width.saturating_sub(CARD_INDENT).max(20))
                .initial_indent("      ")
                .subsequent_indent("      ");
            for line in textwrap::wrap(&clean, options) {
                output.push_str(&format!("{}\n", line));
            }
        }
    }
    output
}

fn find_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| v.as_str().filter(|s| !s.trim().is_empty()))
        .map(str::to_string)
}

fn extract_meta_fields(obj: &Map<String, Value>) -> Vec<(String, String)> {
    let mut meta = Vec::new();
    for key in META_KEYS {
        let Some(val) = obj.get(*key) else {
            continue;
        };
        let formatted = match val {
            Value::String(s) if !s.is_empty() => short_datetime(s),
            Value::Number(n) if *key == "size" => n.as_u64().map(human_size).unwrap_or_default(),
            Value::Number(n) => n.to_string(),
            Value::Array(arr) => arr
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", "),
            _ => continue,
        };
        if !formatted.is_empty() {
            meta.push((key.to_string(), formatted));
        }
    }
    meta
}

// ============================================================================
// Tables
// ============================================================================

pub fn format_as_table(items: &[Value], columns: &[&str]) -> String {
    let present: Vec<&str> = columns
        .iter()
        .copied()
        .filter(|c| items.iter().any(|i| !i.get(*c).unwrap_or(&Value::Null).is_null()))
        .collect();
    if present.is_empty() {
        return format_cards(items, None, terminal_width());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        present
            .iter()
            .map(|c| Cell::new(c.cyan().bold().to_string()))
            .collect::<Vec<_>>(),
    );
    for item in items.iter().take(50) {
        table.add_row(
            present
                .iter()
                .map(|c| Cell::new(format_cell_value(item.get(*c).unwrap_or(&Value::Null))))
                .collect::<Vec<_>>(),
        );
    }

    let mut output = table.to_string();
    output.push('\n');
    if items.len() > 50 {
        output.push_str(&format!("... and {} more\n", items.len() - 50).dimmed().to_string());
    }
    output
}

fn format_cell_value(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => truncate_str(s, 45),
        Value::Array(arr) => format!("[{} items]", arr.len()),
        Value::Object(obj) => format!("{{{}...}}", obj.len()),
    }
}

fn format_section_header(label: &str, count: Option<usize>, width: usize) -> String {
    let count_str = match count {
        Some(n) => format!(" ({})", n),
        None => String::new(),
    };
    let header_text = format!("{}{}", label, count_str);
    let line_len = width.saturating_sub(header_text.len() + 4).min(60);
    format!(
        "{} {} {}",
        "──".cyan(),
        header_text.green().bold(),
        "─".repeat(line_len).cyan()
    )
}

// ============================================================================
// Utility functions
// ============================================================================

fn format_scalar(key: &str, value: &Value) -> String {
    match value {
        Value::Null => "-".dimmed().to_string(),
        Value::Bool(true) => "true".green().to_string(),
        Value::Bool(false) => "false".red().to_string(),
        Value::Number(n) => n.yellow().to_string(),
        Value::String(s) if URL_KEYS.contains(&key) => format_hyperlink(s).blue().to_string(),
        Value::String(s) => s.to_string(),
        Value::Array(arr) => format!("[{} items]", arr.len()),
        Value::Object(obj) => format!("{{{}...}}", obj.len()),
    }
}

/// `2024-05-01T09:30:00Z` -> `2024-05-01 09:30`.
fn short_datetime(s: &str) -> String {
    if s.len() >= 16 && s.as_bytes().get(10) == Some(&b'T') {
        format!("{} {}", &s[..10], &s[11..16])
    } else {
        s.to_string()
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit + 1 < UNITS.len() {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

fn truncate_str(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or(s);
    if first_line.chars().count() <= max_len {
        first_line.to_string()
    } else {
        let truncated: String = first_line.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

fn clean_snippet(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn terminal_width() -> usize {
    terminal_size::terminal_size()
        .map(|(w, _)| w.0 as usize)
        .unwrap_or(DEFAULT_WIDTH)
}

/// OSC 8 hyperlink; terminals without support show the plain URL.
fn format_hyperlink(url: &str) -> String {
    format!("\x1b]8;;{}\x07{}\x1b]8;;\x07", url, url)
}
