//! REST surface over the graphdesk tool catalog, for agents that speak
//! plain HTTP rather than a tool protocol.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use graphdesk_core::connector::tool_catalog;
use graphdesk_core::error::ConnectorError;
use graphdesk_core::router::{LlmRouter, QueryRouter, RoutedCall};
use graphdesk_core::{CallToolRequestParam, Connector, GraphConnector, JsonObject};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

pub const DEFAULT_BIND: &str = "127.0.0.1:8088";

/// Tools that touch the local filesystem or the stored credentials. They stay
/// on the CLI; over HTTP they are neither listed nor callable.
pub const LOCAL_ONLY_TOOLS: &[&str] = &["drive_download", "drive_upload", "auth_start", "auth_poll"];

fn is_local_only(tool: &str) -> bool {
    LOCAL_ONLY_TOOLS.contains(&tool)
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid bind address '{0}'")]
    BadAddress(String),
    #[error("invalid CORS origin '{0}'")]
    BadOrigin(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error body: `{ "ok": false, "error": { "code": "...", "message": "..." } }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ApiErrorResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorResponse {
    pub ok: bool,
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorResponse {
                ok: false,
                error: ApiErrorBody {
                    code: code.into(),
                    message: message.into(),
                },
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn local_only(tool: &str) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "forbidden",
            format!("'{}' is only available from the command line", tool),
        )
    }

    pub fn unroutable(query: &str) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "no_route",
            format!("no tool matches '{}'", query),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<ConnectorError> for ApiError {
    fn from(err: ConnectorError) -> Self {
        let status = match &err {
            ConnectorError::InvalidParams(_) | ConnectorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ConnectorError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ConnectorError::ResourceNotFound | ConnectorError::ToolNotFound => StatusCode::NOT_FOUND,
            ConnectorError::Graph { .. } | ConnectorError::HttpRequest(_) => StatusCode::BAD_GATEWAY,
            ConnectorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.code_str(), err.to_string())
    }
}

#[derive(Clone)]
pub struct AppState {
    connector: Arc<GraphConnector>,
    router: Arc<QueryRouter>,
    cors_origins: Vec<HeaderValue>,
}

impl AppState {
    pub fn new(connector: GraphConnector) -> Self {
        Self {
            connector: Arc::new(connector),
            router: Arc::new(QueryRouter::new()),
            cors_origins: Vec::new(),
        }
    }

    /// Browser origins allowed to call the API. Empty means same-origin only.
    pub fn with_cors_origins(mut self, origins: Vec<HeaderValue>) -> Self {
        self.cors_origins = origins;
        self
    }

    async fn call(&self, tool: &str, arguments: JsonObject) -> Result<Value, ApiError> {
        if is_local_only(tool) {
            warn!(tool, "refused local-only tool over http");
            return Err(ApiError::local_only(tool));
        }
        let result = self
            .connector
            .call_tool(CallToolRequestParam {
                name: tool.to_string().into(),
                arguments: Some(arguments),
            })
            .await?;
        Ok(result.structured_content.unwrap_or(Value::Null))
    }
}

pub fn app(state: AppState) -> Router {
    let origins = state.cors_origins.clone();
    let router = Router::new()
        .route("/health", get(health))
        .route("/tools", get(list_tools))
        .route("/tools/:name", post(call_tool))
        .route("/query", post(query))
        .route("/mail/thread/:message_id", get(mail_thread))
        .with_state(state);
    if origins.is_empty() {
        return router;
    }
    router.layer(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
    )
}

/// Serves until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let addr = listener.local_addr()?;
    info!(%addr, "graphdesk server listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("graphdesk server stopped");
    Ok(())
}

pub fn parse_bind(bind: &str) -> Result<SocketAddr, ServerError> {
    bind.trim()
        .parse()
        .map_err(|_| ServerError::BadAddress(bind.to_string()))
}

/// Parses a comma-separated origin list such as `GRAPHDESK_CORS_ORIGINS`.
/// `*` is refused; origins have to be named.
pub fn parse_cors_origins(raw: &str) -> Result<Vec<HeaderValue>, ServerError> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(|o| {
            if o == "*" {
                return Err(ServerError::BadOrigin(o.to_string()));
            }
            HeaderValue::from_str(o).map_err(|_| ServerError::BadOrigin(o.to_string()))
        })
        .collect()
}

async fn health() -> Json<Value> {
    Json(json!({"ok": true, "version": env!("CARGO_PKG_VERSION")}))
}

async fn list_tools() -> Json<Value> {
    let tools: Vec<Value> = tool_catalog()
        .iter()
        .filter(|t| !is_local_only(&t.name))
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": Value::Object((*t.input_schema).clone()),
            })
        })
        .collect();
    Json(json!({ "tools": tools }))
}

async fn call_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, ApiError> {
    let arguments = match body.map(|Json(v)| v) {
        None | Some(Value::Null) => JsonObject::new(),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(ApiError::bad_request("tool arguments must be a JSON object")),
    };
    debug!(tool = %name, "tool call over http");
    Ok(Json(state.call(&name, arguments).await?))
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "default_execute")]
    pub execute: bool,
    #[serde(default)]
    pub llm: bool,
}

fn default_execute() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub call: RoutedCall,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(ApiError::bad_request("query is empty"));
    }

    let mut routed = None;
    if request.llm {
        match LlmRouter::from_auth(&state.connector.merged_auth(), tool_catalog())? {
            Some(llm) => routed = llm.route(&query).await,
            None => warn!("llm routing requested without llm_api_key; using patterns"),
        }
    }
    let call = routed
        .or_else(|| state.router.route(&query))
        .ok_or_else(|| ApiError::unroutable(&query))?;

    let result = if request.execute {
        Some(state.call(&call.tool, call.arguments.clone()).await?)
    } else {
        None
    };
    Ok(Json(QueryResponse { query, call, result }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ThreadParams {
    pub folder: Option<String>,
    pub scan_cap: Option<usize>,
}

async fn mail_thread(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Query(params): Query<ThreadParams>,
) -> Result<Json<Value>, ApiError> {
    let mut arguments = JsonObject::new();
    arguments.insert("message_id".to_string(), Value::String(message_id));
    if let Some(folder) = params.folder {
        arguments.insert("folder".to_string(), Value::String(folder));
    }
    if let Some(cap) = params.scan_cap {
        arguments.insert("scan_cap".to_string(), json!(cap));
    }
    Ok(Json(state.call("mail_thread", arguments).await?))
}
