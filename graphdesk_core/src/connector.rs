//! `GraphConnector`: the tool catalog and dispatcher over the Graph modules.

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::auth::{merge_auth, AuthDetails, GraphSettings};
use crate::auth_store::{AuthStore, FileAuthStore};
use crate::capabilities::{ConnectorConfigSchema, Field};
use crate::error::ConnectorError;
use crate::graph::{GraphContext, HttpGraph, Mailbox};
use crate::id_cache::IdCache;
use crate::oauth::{self, DevicePoll, TokenProvider};
use crate::utils::structured_result_with_text;
use crate::{analytics, calendar, drive, mail, meetings, thread, Connector};

/// Auth store key for Graph credentials.
pub const PROVIDER: &str = "microsoft-graph";

pub struct GraphConnector {
    auth: AuthDetails,
    store: Arc<dyn AuthStore>,
    ids: Arc<IdCache>,
    session: Mutex<Option<GraphContext>>,
}

impl GraphConnector {
    /// Credentials come from `auth`, then the environment, then the file store.
    pub fn new(auth: AuthDetails) -> Self {
        Self::with_store(auth, Arc::new(FileAuthStore::new_default()))
    }

    pub fn with_store(auth: AuthDetails, store: Arc<dyn AuthStore>) -> Self {
        Self {
            auth,
            store,
            ids: Arc::new(IdCache::default()),
            session: Mutex::new(None),
        }
    }

    /// Uses a ready-made context (any `GraphTransport`) instead of building one
    /// from credentials.
    pub fn with_context(ctx: GraphContext) -> Self {
        Self {
            auth: AuthDetails::new(),
            store: Arc::new(crate::auth_store::MemoryAuthStore::new()),
            ids: ctx.ids.clone(),
            session: Mutex::new(Some(ctx)),
        }
    }

    pub fn store(&self) -> Arc<dyn AuthStore> {
        self.store.clone()
    }

    /// Explicit details over environment over the stored file.
    pub fn merged_auth(&self) -> AuthDetails {
        merge_auth(self.store.load(PROVIDER), &self.auth)
    }

    pub async fn context(&self) -> Result<GraphContext, ConnectorError> {
        let mut session = self.session.lock().await;
        if let Some(ctx) = session.as_ref() {
            return Ok(ctx.clone());
        }
        let auth = self.merged_auth();
        let settings = GraphSettings::from_auth(&auth)?;
        let mailbox = Mailbox::from_option(settings.mailbox.as_deref());
        debug!(method = settings.method.as_str(), mailbox = mailbox.label(), "building Graph session");
        let tokens = TokenProvider::new(settings, auth).with_store(self.store.clone(), PROVIDER);
        let transport = HttpGraph::new(Arc::new(tokens))?;
        let ctx = GraphContext::new(Arc::new(transport), mailbox, self.ids.clone());
        *session = Some(ctx.clone());
        Ok(ctx)
    }

    async fn reset_session(&self) {
        *self.session.lock().await = None;
    }

    async fn auth_start(&self, input: AuthStartInput) -> Result<CallToolResult, ConnectorError> {
        let auth = self.merged_auth();
        let pick = |given: Option<String>, key: &str| {
            given
                .filter(|s| !s.trim().is_empty())
                .or_else(|| auth.get(key).cloned())
        };
        let client_id = pick(input.client_id, "client_id").ok_or_else(|| {
            ConnectorError::InvalidParams("client_id is required".to_string())
        })?;
        let tenant = pick(input.tenant_id, "tenant_id").unwrap_or_default();
        let scopes = pick(input.scopes, "scopes")
            .unwrap_or_else(|| crate::auth::DEFAULT_DELEGATED_SCOPES.to_string());
        let start = oauth::ms_device_authorize(&tenant, &client_id, &scopes).await?;
        structured_result_with_text(&start, None)
    }

    async fn auth_poll(&self, input: AuthPollInput) -> Result<CallToolResult, ConnectorError> {
        let mut auth = self.merged_auth();
        let mut given = Vec::new();
        if let Some(t) = input.tenant_id.filter(|s| !s.trim().is_empty()) {
            auth.insert("tenant_id".to_string(), t.clone());
            given.push(("tenant_id", t));
        }
        if let Some(c) = input.client_id.filter(|s| !s.trim().is_empty()) {
            auth.insert("client_id".to_string(), c.clone());
            given.push(("client_id", c));
        }
        let client_id = auth.get("client_id").cloned().ok_or_else(|| {
            ConnectorError::InvalidParams("client_id is required".to_string())
        })?;
        let tenant = auth.get("tenant_id").cloned().unwrap_or_default();

        match oauth::ms_device_poll(&tenant, &client_id, &input.device_code).await? {
            DevicePoll::Pending => structured_result_with_text(&json!({"status": "pending"}), None),
            DevicePoll::SlowDown => {
                structured_result_with_text(&json!({"status": "slow_down"}), None)
            }
            DevicePoll::Complete(tokens) => {
                given.push(("auth_method", "device_code".to_string()));
                oauth::persist_tokens(self.store.as_ref(), PROVIDER, &tokens, &given)?;
                self.reset_session().await;
                info!("device login complete, credentials stored");
                structured_result_with_text(
                    &json!({
                        "status": "complete",
                        "scope": tokens.scope,
                        "expires_in": tokens.expires_in,
                    }),
                    None,
                )
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AuthStartInput {
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    scopes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthPollInput {
    device_code: String,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
}

fn parse<T: DeserializeOwned>(args: JsonObject) -> Result<T, ConnectorError> {
    serde_json::from_value(Value::Object(args)).map_err(|e| ConnectorError::InvalidParams(e.to_string()))
}

fn tool(name: &'static str, description: &'static str, schema: Value) -> Tool {
    Tool {
        name: Cow::Borrowed(name),
        title: None,
        description: Some(Cow::Borrowed(description)),
        input_schema: Arc::new(schema.as_object().expect("Schema object").clone()),
        output_schema: None,
        annotations: None,
        icons: None,
    }
}

/// Every tool the connector serves, with JSON-schema inputs.
pub fn tool_catalog() -> Vec<Tool> {
    let window = json!({
        "since": {"type": "string", "description": "Start: YYYY-MM-DD, ISO datetime, or a phrase like 'last 7 days'"},
        "until": {"type": "string", "description": "End: YYYY-MM-DD (whole day) or ISO datetime; defaults to now"}
    });
    let with_window = |mut props: Value| {
        if let (Some(p), Some(w)) = (props.as_object_mut(), window.as_object()) {
            for (k, v) in w {
                p.insert(k.clone(), v.clone());
            }
        }
        props
    };
    let limit = json!({"type": "integer", "minimum": 1, "maximum": mail::MAX_LIMIT});
    let scan = json!({"type": "integer", "description": "Messages to examine (50-1000)"});

    vec![
        tool(
            "mail_by_date",
            "List messages received on a date or in a window.",
            json!({"type": "object", "properties": with_window(json!({
                "date": {"type": "string", "description": "YYYY-MM-DD or 'today', 'yesterday'"},
                "folder": {"type": "string", "description": "Mail folder (default: all mail)"},
                "limit": limit
            }))}),
        ),
        tool(
            "mail_by_sender",
            "Find messages from a sender (name or address, case-insensitive substring).",
            json!({"type": "object", "properties": with_window(json!({
                "sender": {"type": "string"},
                "limit": limit,
                "scan": scan
            })), "required": ["sender"]}),
        ),
        tool(
            "mail_by_subject",
            "Find messages whose subject contains the given text.",
            json!({"type": "object", "properties": with_window(json!({
                "subject": {"type": "string"},
                "limit": limit,
                "scan": scan
            })), "required": ["subject"]}),
        ),
        tool(
            "mail_get",
            "Get one message by id or handle (e.g. m3).",
            json!({"type": "object", "properties": {
                "message_id": {"type": "string"},
                "include_body": {"type": "boolean", "description": "Include the text body"}
            }, "required": ["message_id"]}),
        ),
        tool(
            "mail_thread",
            "Resolve the full conversation thread of a message, oldest first.",
            json!({"type": "object", "properties": {
                "message_id": {"type": "string", "description": "Message id or handle"},
                "conversation_id": {"type": "string", "description": "Used when message_id is absent"},
                "folder": {"type": "string", "description": "Folder for the folder strategy (default: the message's folder, else sentitems)"},
                "scan_cap": {"type": "integer", "minimum": thread::MIN_SCAN_CAP, "maximum": thread::MAX_SCAN_CAP}
            }}),
        ),
        tool(
            "mail_themes",
            "Most frequent words in recent message subjects and previews.",
            json!({"type": "object", "properties": with_window(json!({
                "top": {"type": "integer", "minimum": 1, "maximum": 100},
                "scan": scan
            }))}),
        ),
        tool(
            "mail_top_senders",
            "Senders ranked by message count.",
            json!({"type": "object", "properties": with_window(json!({
                "top": {"type": "integer", "minimum": 1, "maximum": 100},
                "scan": scan
            }))}),
        ),
        tool(
            "calendar_by_date",
            "List calendar events on a date or in a window.",
            json!({"type": "object", "properties": with_window(json!({
                "date": {"type": "string", "description": "YYYY-MM-DD or a phrase like 'this week'"},
                "limit": limit
            }))}),
        ),
        tool(
            "calendar_by_organizer",
            "Events organized by someone (name or address). Defaults to +/- 30 days.",
            json!({"type": "object", "properties": with_window(json!({
                "organizer": {"type": "string"},
                "limit": limit
            })), "required": ["organizer"]}),
        ),
        tool(
            "calendar_by_subject",
            "Events whose subject contains the given text. Defaults to +/- 30 days.",
            json!({"type": "object", "properties": with_window(json!({
                "subject": {"type": "string"},
                "limit": limit
            })), "required": ["subject"]}),
        ),
        tool(
            "calendar_top_organizers",
            "Organizers ranked by event count.",
            json!({"type": "object", "properties": with_window(json!({
                "top": {"type": "integer", "minimum": 1, "maximum": 100}
            }))}),
        ),
        tool(
            "meeting_get",
            "Get a Teams online meeting by id or handle (e.g. o2).",
            json!({"type": "object", "properties": {
                "meeting_id": {"type": "string"}
            }, "required": ["meeting_id"]}),
        ),
        tool(
            "meeting_by_title",
            "Find online meetings by title, resolving each to its meeting id.",
            json!({"type": "object", "properties": with_window(json!({
                "title": {"type": "string"},
                "limit": limit
            })), "required": ["title"]}),
        ),
        tool(
            "meeting_transcript",
            "Fetch a meeting transcript as speaker turns (latest transcript by default).",
            json!({"type": "object", "properties": {
                "meeting_id": {"type": "string"},
                "transcript_id": {"type": "string"}
            }, "required": ["meeting_id"]}),
        ),
        tool(
            "meeting_audience",
            "Invited attendees merged with the meeting's participant list.",
            json!({"type": "object", "properties": {
                "event_id": {"type": "string"},
                "meeting_id": {"type": "string"}
            }}),
        ),
        tool(
            "meeting_attendance",
            "Attendance records across a meeting's attendance reports.",
            json!({"type": "object", "properties": {
                "meeting_id": {"type": "string"}
            }, "required": ["meeting_id"]}),
        ),
        tool(
            "drive_list",
            "List OneDrive files under a folder path (root by default).",
            json!({"type": "object", "properties": {
                "path": {"type": "string"},
                "limit": limit
            }}),
        ),
        tool(
            "drive_download",
            "Download a OneDrive file by item id/handle or path.",
            json!({"type": "object", "properties": {
                "item_id": {"type": "string"},
                "path": {"type": "string"},
                "destination": {"type": "string", "description": "Local file or directory (default: current directory)"}
            }}),
        ),
        tool(
            "drive_upload",
            "Upload a local file to OneDrive (chunked above 4 MiB).",
            json!({"type": "object", "properties": {
                "local_path": {"type": "string"},
                "remote_path": {"type": "string", "description": "Target path; a trailing '/' keeps the local file name"}
            }, "required": ["local_path"]}),
        ),
        tool(
            "auth_start",
            "Start device authorization (returns user_code and verification URL).",
            json!({"type": "object", "properties": {
                "tenant_id": {"type": "string"},
                "client_id": {"type": "string"},
                "scopes": {"type": "string", "description": "Space-separated scopes"}
            }}),
        ),
        tool(
            "auth_poll",
            "Poll the token endpoint for a device code; stores tokens on success.",
            json!({"type": "object", "properties": {
                "device_code": {"type": "string"},
                "tenant_id": {"type": "string"},
                "client_id": {"type": "string"}
            }, "required": ["device_code"]}),
        ),
    ]
}

#[async_trait]
impl Connector for GraphConnector {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn description(&self) -> &'static str {
        "Microsoft 365 via Microsoft Graph: Outlook mail threads, calendar, Teams meetings and OneDrive."
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
    ) -> Result<ListToolsResult, ConnectorError> {
        Ok(ListToolsResult {
            tools: tool_catalog(),
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, ConnectorError> {
        let args = request.arguments.unwrap_or_default();
        let name = request.name.as_ref();
        debug!(tool = name, "calling tool");

        match name {
            "auth_start" => return self.auth_start(parse(args)?).await,
            "auth_poll" => return self.auth_poll(parse(args)?).await,
            _ => {}
        }
        if !tool_catalog().iter().any(|t| t.name == name) {
            return Err(ConnectorError::ToolNotFound);
        }

        let ctx = self.context().await?;
        let ctx = &ctx;
        match name {
            "mail_by_date" => structured_result_with_text(&mail::by_date(ctx, parse(args)?).await?, None),
            "mail_by_sender" => structured_result_with_text(&mail::by_sender(ctx, parse(args)?).await?, None),
            "mail_by_subject" => {
                structured_result_with_text(&mail::by_subject(ctx, parse(args)?).await?, None)
            }
            "mail_get" => structured_result_with_text(&mail::get(ctx, parse(args)?).await?, None),
            "mail_thread" => structured_result_with_text(&thread::thread(ctx, parse(args)?).await?, None),
            "mail_themes" => {
                structured_result_with_text(&analytics::mail_themes(ctx, parse(args)?).await?, None)
            }
            "mail_top_senders" => {
                structured_result_with_text(&analytics::mail_top_senders(ctx, parse(args)?).await?, None)
            }
            "calendar_by_date" => {
                structured_result_with_text(&calendar::by_date(ctx, parse(args)?).await?, None)
            }
            "calendar_by_organizer" => {
                structured_result_with_text(&calendar::by_organizer(ctx, parse(args)?).await?, None)
            }
            "calendar_by_subject" => {
                structured_result_with_text(&calendar::by_subject(ctx, parse(args)?).await?, None)
            }
            "calendar_top_organizers" => structured_result_with_text(
                &analytics::calendar_top_organizers(ctx, parse(args)?).await?,
                None,
            ),
            "meeting_get" => structured_result_with_text(&meetings::get(ctx, parse(args)?).await?, None),
            "meeting_by_title" => {
                structured_result_with_text(&meetings::by_title(ctx, parse(args)?).await?, None)
            }
            "meeting_transcript" => {
                structured_result_with_text(&meetings::transcript(ctx, parse(args)?).await?, None)
            }
            "meeting_audience" => {
                structured_result_with_text(&meetings::audience(ctx, parse(args)?).await?, None)
            }
            "meeting_attendance" => {
                structured_result_with_text(&meetings::attendance(ctx, parse(args)?).await?, None)
            }
            "drive_list" => structured_result_with_text(&drive::list(ctx, parse(args)?).await?, None),
            "drive_download" => {
                structured_result_with_text(&drive::download(ctx, parse(args)?).await?, None)
            }
            "drive_upload" => structured_result_with_text(&drive::upload(ctx, parse(args)?).await?, None),
            _ => Err(ConnectorError::ToolNotFound),
        }
    }

    async fn get_auth_details(&self) -> Result<AuthDetails, ConnectorError> {
        Ok(self.merged_auth())
    }

    async fn set_auth_details(&mut self, details: AuthDetails) -> Result<(), ConnectorError> {
        self.auth = details;
        self.reset_session().await;
        Ok(())
    }

    /// Reads the inbox folder id: succeeds only with a working token and
    /// mail scope for the configured mailbox.
    async fn test_auth(&self) -> Result<(), ConnectorError> {
        let ctx = self.context().await?;
        let url = ctx.url().segment("mailFolders").segment("inbox").select(&["id"]);
        ctx.get(&url).await.map(|_| ())
    }

    fn config_schema(&self) -> ConnectorConfigSchema {
        ConnectorConfigSchema {
            fields: vec![
                Field::text("tenant_id", "Tenant ID", "Azure Entra tenant ID ('common' when omitted)."),
                Field::text("client_id", "Client ID", "App registration client ID."),
                Field::secret("client_secret", "Client Secret", "Required for the client credentials flow."),
                Field::select(
                    "auth_method",
                    "Auth Method",
                    "OAuth flow: device code for a user, client credentials for a daemon.",
                    &["device_code", "client_credentials"],
                ),
                Field::text("scopes", "Scopes", "Space-separated scopes, e.g. Mail.Read Calendars.Read Files.ReadWrite"),
                Field::text("mailbox", "Mailbox", "User principal name to act on (required for app-only tokens)."),
                Field::text("graph_base_url", "Graph Base URL", "Override for national clouds."),
                Field::secret("access_token", "Access Token", "Static bearer token, mostly for testing."),
                Field::secret("llm_api_key", "LLM API Key", "Key for `ask --llm` routing."),
                Field::text("llm_model", "LLM Model", "Chat model for routing (default gpt-4o-mini)."),
                Field::text("llm_base_url", "LLM Base URL", "OpenAI-compatible endpoint."),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::{context, FakeGraph};
    use crate::mail::message_json;
    use crate::router::QueryRouter;

    fn request(name: &str, args: Value) -> CallToolRequestParam {
        CallToolRequestParam {
            name: name.to_string().into(),
            arguments: args.as_object().cloned(),
        }
    }

    #[test]
    fn connector_name_keys_the_auth_store() {
        let store = Arc::new(crate::auth_store::MemoryAuthStore::new());
        let mut stored = AuthDetails::new();
        stored.insert("refresh_token".into(), "rt-1".into());
        let connector = GraphConnector::with_store(AuthDetails::new(), store.clone());
        store.save(connector.name(), &stored).unwrap();
        assert_eq!(connector.merged_auth().get("refresh_token").map(String::as_str), Some("rt-1"));
    }

    #[test]
    fn catalog_covers_every_routable_tool() {
        let names: Vec<String> = tool_catalog().iter().map(|t| t.name.to_string()).collect();
        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), names.len());
        for info in QueryRouter::new().list_patterns() {
            assert!(names.contains(&info.tool), "{} missing from catalog", info.tool);
        }
    }

    #[tokio::test]
    async fn thread_tool_returns_structured_messages() {
        let fake = FakeGraph::new().json(
            "$search=",
            json!({"value": [
                message_json("b", "conv-1", "Megan", "Re: plan", "2024-05-02T09:00:00Z"),
                message_json("a", "conv-1", "Alex", "plan", "2024-05-01T09:00:00Z"),
            ]}),
        );
        let (ctx, _fake) = context(fake);
        let connector = GraphConnector::with_context(ctx);
        let result = connector
            .call_tool(request("mail_thread", json!({"conversation_id": "conv-1"})))
            .await
            .unwrap();
        let data = result.structured_content.unwrap();
        assert_eq!(data["strategy"], "search");
        assert_eq!(data["count"], 2);
        assert_eq!(data["messages"][0]["id"], "a");
        assert_eq!(data["attempts"][0]["status"], "found");
    }

    #[tokio::test]
    async fn bad_arguments_and_unknown_tools_are_rejected() {
        let (ctx, fake) = context(FakeGraph::new());
        let connector = GraphConnector::with_context(ctx);
        let err = connector
            .call_tool(request("mail_by_sender", json!({"limit": 5})))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidParams(_)));
        let err = connector
            .call_tool(request("send_mail", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::ToolNotFound));
        assert!(fake.requested().is_empty());
    }

    #[tokio::test]
    async fn missing_credentials_surface_as_auth_errors() {
        let connector = GraphConnector::with_store(
            AuthDetails::new(),
            Arc::new(crate::auth_store::MemoryAuthStore::new()),
        );
        // Environment may carry AZURE_* in CI; only assert when it does not.
        if std::env::var("AZURE_CLIENT_SECRET").is_err() && std::env::var("GRAPH_ACCESS_TOKEN").is_err() {
            let err = connector.test_auth().await.unwrap_err();
            assert!(matches!(err, ConnectorError::Authentication(_)));
        }
    }
}
