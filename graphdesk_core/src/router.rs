//! Free-text query routing.
//!
//! [`QueryRouter`] maps a natural-language request onto one Graph tool call:
//! prioritized regex patterns first, then a keyword scorer. Date phrases
//! ("yesterday", "last 3 days") become `since`/`until` arguments.
//!
//! ```rust,ignore
//! use graphdesk_core::router::QueryRouter;
//!
//! let router = QueryRouter::new();
//! let call = router.route("emails from megan last week").unwrap();
//! assert_eq!(call.tool, "mail_by_sender");
//! assert_eq!(call.arguments["sender"], "megan");
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use rmcp::model::Tool;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value};
use tracing::{debug, warn};

use crate::auth::AuthDetails;
use crate::error::ConnectorError;
use crate::filters::{to_graph_datetime, DateRange};
use crate::utils::truncate_chars;

/// A routed tool call ready to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedCall {
    pub tool: String,
    pub arguments: JsonMap<String, Value>,
    /// 0.0 - 1.0
    pub confidence: f32,
    /// What was detected, for display.
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct QueryPattern {
    pub id: &'static str,
    pub tool: &'static str,
    pub pattern: Regex,
    /// capture name -> argument name
    pub arg_mapping: &'static [(&'static str, &'static str)],
    /// Higher is checked first.
    pub priority: u32,
    pub description: &'static str,
    pub example: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternInfo {
    pub id: String,
    pub tool: String,
    pub description: String,
    pub example: String,
}

/// Tools that take `since`/`until` and get them from date phrases.
const RANGE_TOOLS: &[&str] = &[
    "mail_by_date",
    "mail_by_sender",
    "mail_by_subject",
    "mail_themes",
    "mail_top_senders",
    "calendar_by_date",
    "calendar_by_organizer",
    "calendar_by_subject",
    "calendar_top_organizers",
    "meeting_by_title",
];

/// Keyword vocabulary per fallback tool.
const KEYWORDS: &[(&str, &[&str])] = &[
    (
        "mail_by_date",
        &["email", "emails", "mail", "mails", "inbox", "message", "messages", "unread", "outlook"],
    ),
    (
        "calendar_by_date",
        &["calendar", "meeting", "meetings", "event", "events", "schedule", "agenda", "appointment", "appointments"],
    ),
    (
        "drive_list",
        &["file", "files", "onedrive", "drive", "document", "documents", "folder", "folders"],
    ),
];

pub struct QueryRouter {
    patterns: Vec<QueryPattern>,
}

impl Default for QueryRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryRouter {
    pub fn new() -> Self {
        Self {
            patterns: build_default_patterns(),
        }
    }

    pub fn route(&self, query: &str) -> Option<RoutedCall> {
        self.route_at(query, Utc::now())
    }

    /// Routes relative to `now` (date phrases are resolved against it).
    pub fn route_at(&self, query: &str, now: DateTime<Utc>) -> Option<RoutedCall> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }
        let call = self
            .match_patterns(query)
            .into_iter()
            .next()
            .or_else(|| keyword_route(query))?;
        Some(apply_date_phrase(call, query, now))
    }

    /// Every pattern that matches, in priority order. No keyword fallback.
    pub fn candidates(&self, query: &str) -> Vec<RoutedCall> {
        self.match_patterns(query.trim())
    }

    pub fn list_patterns(&self) -> Vec<PatternInfo> {
        self.patterns
            .iter()
            .map(|p| PatternInfo {
                id: p.id.to_string(),
                tool: p.tool.to_string(),
                description: p.description.to_string(),
                example: p.example.to_string(),
            })
            .collect()
    }

    fn match_patterns(&self, query: &str) -> Vec<RoutedCall> {
        let mut results = Vec::new();
        for pattern in &self.patterns {
            let Some(captures) = pattern.pattern.captures(query) else {
                continue;
            };
            let mut arguments = JsonMap::new();
            for (capture_name, arg_name) in pattern.arg_mapping {
                if let Some(m) = captures.name(capture_name) {
                    let value = clean_capture(m.as_str(), PATH_ARGS.contains(arg_name));
                    if !value.is_empty() {
                        arguments.insert(arg_name.to_string(), Value::String(value));
                    }
                }
            }
            results.push(RoutedCall {
                tool: pattern.tool.to_string(),
                arguments: normalize_arguments(pattern.tool, arguments),
                confidence: 0.9,
                description: pattern.description.to_string(),
            });
        }
        results
    }
}

/// Arguments holding local or drive paths; their dots are significant.
const PATH_ARGS: &[&str] = &["path", "local_path", "remote_path", "destination"];

/// Drops surrounding quotes and trailing sentence punctuation. Leading dots
/// are kept (`./notes.txt`), and paths keep a trailing dot too.
fn clean_capture(raw: &str, is_path: bool) -> String {
    let mut value = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim_end_matches(|c| c == '?' || c == '!')
        .trim_end();
    if !is_path {
        value = value.strip_suffix('.').unwrap_or(value);
    }
    value.trim_matches(|c| c == '"' || c == '\'').trim().to_string()
}

/// Tool-specific fixes: a drive handle given where a path was captured.
fn normalize_arguments(tool: &str, mut args: JsonMap<String, Value>) -> JsonMap<String, Value> {
    if tool == "drive_download" {
        let is_handle = args
            .get("path")
            .and_then(Value::as_str)
            .map(|p| p.len() > 1 && p.starts_with('f') && p[1..].chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false);
        if is_handle {
            if let Some(v) = args.remove("path") {
                args.insert("item_id".to_string(), v);
            }
        }
    }
    args
}

fn keyword_route(query: &str) -> Option<RoutedCall> {
    let lowered = query.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let (tool, score) = KEYWORDS
        .iter()
        .map(|(tool, vocab)| (*tool, words.iter().filter(|w| vocab.contains(w)).count()))
        .filter(|(_, score)| *score > 0)
        // First listed wins ties.
        .fold(None::<(&str, usize)>, |best, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        })?;

    let mut arguments = JsonMap::new();
    match tool {
        "mail_by_date" => {
            arguments.insert("since".into(), Value::String("last 7 days".into()));
        }
        "calendar_by_date" => {
            arguments.insert("date".into(), Value::String("today".into()));
        }
        _ => {}
    }
    Some(RoutedCall {
        tool: tool.to_string(),
        arguments,
        confidence: (0.3 + 0.1 * score as f32).min(0.6),
        description: format!("keyword match ({} hits)", score),
    })
}

/// Replaces default windows with a date phrase found in the query.
fn apply_date_phrase(mut call: RoutedCall, query: &str, now: DateTime<Utc>) -> RoutedCall {
    if !RANGE_TOOLS.contains(&call.tool.as_str()) {
        return call;
    }
    let explicit = ["since", "until"]
        .iter()
        .any(|k| call.arguments.contains_key(*k))
        && call.confidence > 0.6;
    if explicit || call.arguments.get("date").map(|d| is_iso_date(d)).unwrap_or(false) {
        return call;
    }
    if let Some(range) = DateRange::from_phrase(query, now) {
        call.arguments.remove("date");
        call.arguments
            .insert("since".into(), Value::String(to_graph_datetime(&range.start)));
        call.arguments
            .insert("until".into(), Value::String(to_graph_datetime(&range.end)));
    }
    call
}

fn is_iso_date(v: &Value) -> bool {
    v.as_str()
        .map(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok())
        .unwrap_or(false)
}

/// Trailing time qualifiers that should not end up inside a captured name.
const TIME_TAIL: &str = r"(?:\s+(?:today|yesterday|this\s+(?:week|month)|last\s+week|(?:last|past)\s+\d+\s+days?|since\s+\S+|on\s+\d{4}-\d{2}-\d{2}))?\s*[?.!]?\s*$";

fn build_default_patterns() -> Vec<QueryPattern> {
    let re = |src: &str| Regex::new(src).expect("router pattern");
    let tail = |head: &str| re(&format!("{}{}", head, TIME_TAIL));

    let mut patterns = vec![
        // === Meetings ===
        QueryPattern {
            id: "meeting_transcript",
            tool: "meeting_transcript",
            pattern: re(r"(?i)\btranscripts?\b.*?\b(?:of|for)\s+(?:the\s+)?(?:meeting\s+)?(?P<meeting_id>o\d+|[A-Za-z0-9_=\-]{20,})\s*[?.]?$"),
            arg_mapping: &[("meeting_id", "meeting_id")],
            priority: 100,
            description: "Transcript of an online meeting",
            example: "transcript of meeting o2",
        },
        QueryPattern {
            id: "meeting_attendance",
            tool: "meeting_attendance",
            pattern: re(r"(?i)\b(?:attendance|who\s+(?:attended|joined))\b.*?\b(?P<meeting_id>o\d+)\b"),
            arg_mapping: &[("meeting_id", "meeting_id")],
            priority: 100,
            description: "Attendance report of an online meeting",
            example: "who attended o1",
        },
        QueryPattern {
            id: "meeting_audience",
            tool: "meeting_audience",
            pattern: re(r"(?i)\b(?:audience|attendees|invitees|participants|who\s+(?:is|was)\s+invited)\b.*?(?:\b(?P<event_id>e\d+)\b|\b(?P<meeting_id>o\d+)\b)"),
            arg_mapping: &[("event_id", "event_id"), ("meeting_id", "meeting_id")],
            priority: 95,
            description: "Invited attendees and meeting roster",
            example: "attendees of e3",
        },
        QueryPattern {
            id: "meeting_get",
            tool: "meeting_get",
            pattern: re(r"(?i)^(?:show|open|get|details\s+(?:of|for))\s+(?:online\s+)?meeting\s+(?P<meeting_id>o\d+)\s*$"),
            arg_mapping: &[("meeting_id", "meeting_id")],
            priority: 90,
            description: "Online meeting details",
            example: "show meeting o4",
        },
        QueryPattern {
            id: "meeting_by_title",
            tool: "meeting_by_title",
            pattern: tail(r#"(?i)\b(?:teams\s+)?meetings?\s+(?:called|titled|named)\s+(?P<title>.+?)"#),
            arg_mapping: &[("title", "title")],
            priority: 80,
            description: "Online meetings by title",
            example: "meetings called \"Quarterly review\"",
        },
        // === Mail ===
        QueryPattern {
            id: "mail_thread",
            tool: "mail_thread",
            pattern: re(r"(?i)\b(?:thread|conversation)\b.*?\b(?P<message_id>m\d+|[A-Za-z0-9+/=_\-]{40,})\s*[?.]?$"),
            arg_mapping: &[("message_id", "message_id")],
            priority: 90,
            description: "Full conversation thread of a message",
            example: "show the thread for m3",
        },
        QueryPattern {
            id: "mail_get",
            tool: "mail_get",
            pattern: re(r"(?i)^(?:open|show|read|get)\s+(?:the\s+)?(?:email|mail|message)\s+(?P<message_id>\S+)\s*$"),
            arg_mapping: &[("message_id", "message_id")],
            priority: 85,
            description: "One message with its body",
            example: "read email m2",
        },
        QueryPattern {
            id: "mail_top_senders",
            tool: "mail_top_senders",
            pattern: re(r"(?i)\b(?:top|most\s+(?:frequent|active))\s+senders?\b|\bwho\s+(?:emails|mails|writes\s+to)\s+me\s+(?:the\s+)?most\b"),
            arg_mapping: &[],
            priority: 75,
            description: "Most frequent senders",
            example: "top senders this month",
        },
        QueryPattern {
            id: "mail_themes",
            tool: "mail_themes",
            pattern: re(r"(?i)\b(?:themes?|topics?|trending|recurring\s+subjects?)\b"),
            arg_mapping: &[],
            priority: 70,
            description: "Recurring words in recent mail",
            example: "main themes in my email last week",
        },
        QueryPattern {
            id: "mail_by_sender",
            tool: "mail_by_sender",
            pattern: tail(r"(?i)\b(?:e-?mails?|mails?|messages?)\s+(?:from|sent\s+by)\s+(?P<sender>.+?)"),
            arg_mapping: &[("sender", "sender")],
            priority: 60,
            description: "Messages from a sender",
            example: "emails from Megan yesterday",
        },
        QueryPattern {
            id: "mail_by_subject",
            tool: "mail_by_subject",
            pattern: tail(r"(?i)\b(?:e-?mails?|mails?|messages?)\s+(?:about|regarding|with\s+subject|titled)\s+(?P<subject>.+?)"),
            arg_mapping: &[("subject", "subject")],
            priority: 60,
            description: "Messages by subject",
            example: "emails about budget",
        },
        QueryPattern {
            id: "mail_by_date",
            tool: "mail_by_date",
            pattern: re(r"(?i)\b(?:e-?mails?|mails?|messages?|inbox)\b.*?\b(?P<date>\d{4}-\d{2}-\d{2})\b"),
            arg_mapping: &[("date", "date")],
            priority: 55,
            description: "Messages received on a date",
            example: "emails on 2024-05-01",
        },
        // === Calendar ===
        QueryPattern {
            id: "calendar_top_organizers",
            tool: "calendar_top_organizers",
            pattern: re(r"(?i)\b(?:top|most\s+(?:frequent|active))\s+(?:meeting\s+)?organi[sz]ers?\b|\bwho\s+(?:organi[sz]es|schedules)\s+(?:the\s+)?most\b"),
            arg_mapping: &[],
            priority: 75,
            description: "Most frequent meeting organizers",
            example: "top organizers this month",
        },
        QueryPattern {
            id: "calendar_by_organizer",
            tool: "calendar_by_organizer",
            pattern: tail(r"(?i)\b(?:meetings?|events?|invites?|calendar)\b.*?\b(?:organi[sz]ed|scheduled|set\s+up|sent)\s+by\s+(?P<organizer>.+?)"),
            arg_mapping: &[("organizer", "organizer")],
            priority: 65,
            description: "Events by organizer",
            example: "meetings organized by Alex",
        },
        QueryPattern {
            id: "calendar_by_subject",
            tool: "calendar_by_subject",
            pattern: tail(r"(?i)\b(?:meetings?|events?|invites?)\s+(?:about|regarding|on\s+the\s+topic\s+of|with\s+subject)\s+(?P<subject>.+?)"),
            arg_mapping: &[("subject", "subject")],
            priority: 60,
            description: "Events by subject",
            example: "meetings about hiring",
        },
        QueryPattern {
            id: "calendar_by_date",
            tool: "calendar_by_date",
            pattern: re(r"(?i)\b(?:calendar|meetings?|events?|schedule|agenda)\b.*?\b(?P<date>\d{4}-\d{2}-\d{2})\b"),
            arg_mapping: &[("date", "date")],
            priority: 55,
            description: "Events on a date",
            example: "meetings on 2024-05-01",
        },
        // === Drive ===
        QueryPattern {
            id: "drive_upload",
            tool: "drive_upload",
            pattern: re(r"(?i)^upload\s+(?P<local_path>\S+)(?:\s+(?:to|into)\s+(?P<remote_path>\S+))?\s*$"),
            arg_mapping: &[("local_path", "local_path"), ("remote_path", "remote_path")],
            priority: 90,
            description: "Upload a local file to OneDrive",
            example: "upload ./report.pdf to Docs/",
        },
        QueryPattern {
            id: "drive_download",
            tool: "drive_download",
            pattern: re(r"(?i)^download\s+(?P<path>\S+)(?:\s+(?:to|into)\s+(?P<destination>\S+))?\s*$"),
            arg_mapping: &[("path", "path"), ("destination", "destination")],
            priority: 90,
            description: "Download a OneDrive file",
            example: "download Reports/q1.xlsx to ./out/",
        },
        QueryPattern {
            id: "drive_list",
            tool: "drive_list",
            pattern: re(r"(?i)\b(?:list|show|browse)\s+(?:my\s+)?(?:files|onedrive|drive)(?:\s+in\s+(?P<path>\S+))?"),
            arg_mapping: &[("path", "path")],
            priority: 50,
            description: "List OneDrive files",
            example: "list files in Reports",
        },
    ];

    patterns.sort_by(|a, b| b.priority.cmp(&a.priority));
    patterns
}

pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";

/// Routes through an OpenAI-compatible chat model, falling back to
/// [`QueryRouter`] when the model is unreachable or answers with something
/// that is not a known tool.
pub struct LlmRouter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    catalog: Vec<Tool>,
    fallback: QueryRouter,
}

impl LlmRouter {
    pub fn new(api_key: impl Into<String>, catalog: Vec<Tool>) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(ConnectorError::HttpRequest)?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_LLM_MODEL.to_string(),
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            catalog,
            fallback: QueryRouter::new(),
        })
    }

    /// Reads `llm_api_key`, `llm_model` and `llm_base_url` from merged auth.
    /// `None` when no key is configured.
    pub fn from_auth(auth: &AuthDetails, catalog: Vec<Tool>) -> Result<Option<Self>, ConnectorError> {
        let Some(key) = auth.get("llm_api_key").filter(|k| !k.trim().is_empty()) else {
            return Ok(None);
        };
        let mut router = Self::new(key.trim(), catalog)?;
        if let Some(model) = auth.get("llm_model").filter(|m| !m.trim().is_empty()) {
            router = router.with_model(model.trim());
        }
        if let Some(base) = auth.get("llm_base_url").filter(|b| !b.trim().is_empty()) {
            router = router.with_base_url(base.trim());
        }
        Ok(Some(router))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Never fails: errors from the model are logged and the regex/keyword
    /// router answers instead.
    pub async fn route(&self, query: &str) -> Option<RoutedCall> {
        match self.ask_model(query).await {
            Ok(call) => Some(call),
            Err(e) => {
                warn!(error = %e, "LLM routing failed, using keyword router");
                self.fallback.route(query)
            }
        }
    }

    async fn ask_model(&self, query: &str) -> Result<RoutedCall, ConnectorError> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": self.system_prompt() },
                { "role": "user", "content": query }
            ]
        });
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!(%url, model = %self.model, "routing query through LLM");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ConnectorError::HttpRequest)?;
        let status = resp.status();
        let value: Value = resp.json().await.map_err(ConnectorError::HttpRequest)?;
        if !status.is_success() {
            return Err(ConnectorError::Other(format!(
                "LLM API error: {} - {}",
                status, value
            )));
        }

        let content = value
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .unwrap_or("");
        parse_model_reply(content, &self.catalog)
    }

    fn system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You route requests about a Microsoft 365 mailbox to exactly one tool.\n\
             Reply with a single JSON object {\"tool\": <name>, \"arguments\": {...}} and nothing else.\n\
             Dates use YYYY-MM-DD; relative windows may be phrases like \"last 7 days\".\n\nTools:\n",
        );
        for tool in &self.catalog {
            let params: Vec<&str> = tool
                .input_schema
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| props.keys().map(String::as_str).collect())
                .unwrap_or_default();
            prompt.push_str(&format!(
                "- {}({}): {}\n",
                tool.name,
                params.join(", "),
                tool.description.as_deref().unwrap_or("")
            ));
        }
        prompt
    }
}

/// Extracts `{tool, arguments}` from a model reply that may wrap the object
/// in prose or a code fence.
pub fn parse_model_reply(content: &str, catalog: &[Tool]) -> Result<RoutedCall, ConnectorError> {
    let start = content.find('{');
    let end = content.rfind('}');
    let json_str = match (start, end) {
        (Some(s), Some(e)) if e > s => &content[s..=e],
        _ => {
            return Err(ConnectorError::Other(format!(
                "LLM reply has no JSON object: {}",
                truncate_chars(content, 120)
            )))
        }
    };

    #[derive(Deserialize)]
    struct Reply {
        tool: String,
        #[serde(default)]
        arguments: Option<JsonMap<String, Value>>,
    }
    let reply: Reply = serde_json::from_str(json_str)?;
    if !catalog.iter().any(|t| t.name == reply.tool) {
        return Err(ConnectorError::Other(format!(
            "LLM chose unknown tool '{}'",
            reply.tool
        )));
    }
    Ok(RoutedCall {
        tool: reply.tool,
        arguments: reply.arguments.unwrap_or_default(),
        confidence: 0.8,
        description: "chosen by LLM".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        crate::filters::parse_graph_datetime("2024-05-15T13:00:00Z").unwrap()
    }

    #[test]
    fn sender_queries_get_a_window() {
        let router = QueryRouter::new();
        let call = router.route_at("emails from Megan Bowen yesterday", now()).unwrap();
        assert_eq!(call.tool, "mail_by_sender");
        assert_eq!(call.arguments["sender"], "Megan Bowen");
        assert_eq!(call.arguments["since"], "2024-05-14T00:00:00Z");
        assert_eq!(call.arguments["until"], "2024-05-14T23:59:59.9999999Z");
    }

    #[test]
    fn keyword_fallback_scores_vocabulary() {
        let router = QueryRouter::new();
        let call = router.route_at("anything new in my inbox?", now()).unwrap();
        assert_eq!(call.tool, "mail_by_date");
        assert!(call.confidence < 0.9);
        assert_eq!(call.arguments["since"], "last 7 days");

        let call = router.route_at("what is on my agenda this week", now()).unwrap();
        assert_eq!(call.tool, "calendar_by_date");
        assert_eq!(call.arguments["since"], "2024-05-13T00:00:00Z");
        assert!(call.arguments.get("date").is_none());

        assert!(router.route_at("tell me a joke", now()).is_none());
    }

    #[test]
    fn drive_handles_become_item_ids() {
        let router = QueryRouter::new();
        let call = router.route("download f4 to ./out/").unwrap();
        assert_eq!(call.tool, "drive_download");
        assert_eq!(call.arguments["item_id"], "f4");
        assert_eq!(call.arguments["destination"], "./out/");
    }

    #[test]
    fn captures_keep_leading_dots_and_path_punctuation() {
        assert_eq!(clean_capture(" \"./report.pdf\" ", true), "./report.pdf");
        assert_eq!(clean_capture("../drafts/notes.", true), "../drafts/notes.");
        assert_eq!(clean_capture("budget.", false), "budget");
        assert_eq!(clean_capture("'hiring'?", false), "hiring");
        assert_eq!(clean_capture(".env?", true), ".env");

        let call = QueryRouter::new().route("upload ../shared/plan.docx to Docs/").unwrap();
        assert_eq!(call.arguments["local_path"], "../shared/plan.docx");
    }

    #[test]
    fn iso_dates_are_kept_as_dates() {
        let router = QueryRouter::new();
        let call = router.route_at("meetings on 2024-05-01", now()).unwrap();
        assert_eq!(call.tool, "calendar_by_date");
        assert_eq!(call.arguments["date"], "2024-05-01");
        assert!(call.arguments.get("since").is_none());
    }

    #[test]
    fn every_example_routes_to_its_tool() {
        let router = QueryRouter::new();
        for info in router.list_patterns() {
            let call = router
                .route_at(&info.example, now())
                .unwrap_or_else(|| panic!("no route for {}", info.example));
            assert_eq!(call.tool, info.tool, "example '{}'", info.example);
        }
    }

    fn catalog() -> Vec<Tool> {
        ["mail_thread", "drive_list"]
            .iter()
            .map(|name| {
                let schema = json!({"type": "object", "properties": {"message_id": {"type": "string"}}});
                Tool {
                    name: (*name).into(),
                    title: None,
                    description: Some("test tool".into()),
                    input_schema: std::sync::Arc::new(schema.as_object().unwrap().clone()),
                    output_schema: None,
                    annotations: None,
                    icons: None,
                }
            })
            .collect()
    }

    #[test]
    fn model_reply_inside_prose_is_parsed() {
        let reply = "Sure!\n```json\n{\"tool\": \"mail_thread\", \"arguments\": {\"message_id\": \"m1\"}}\n```";
        let call = parse_model_reply(reply, &catalog()).unwrap();
        assert_eq!(call.tool, "mail_thread");
        assert_eq!(call.arguments["message_id"], "m1");

        assert!(parse_model_reply("{\"tool\": \"send_mail\"}", &catalog()).is_err());
        assert!(parse_model_reply("no idea", &catalog()).is_err());
    }

    #[tokio::test]
    async fn failing_model_request_falls_back_to_keywords() {
        // Not a URL, so the request fails while building; nothing is dialled.
        let router = LlmRouter::new("sk-test", catalog())
            .unwrap()
            .with_base_url("not a url");
        let call = router.route("list files in Reports").await.unwrap();
        assert_eq!(call.tool, "drive_list");
        assert_eq!(call.arguments["path"], "Reports");
    }
}
