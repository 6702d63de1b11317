// src/error.rs
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Resource not found")]
    ResourceNotFound,

    #[error("Tool not found")]
    ToolNotFound,

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Graph API error {status} ({code}): {message}")]
    Graph {
        status: u16,
        code: String,
        message: String,
    },

    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl ConnectorError {
    /// Builds an error from a non-success Graph response body.
    ///
    /// Graph wraps failures as `{"error": {"code": "...", "message": "..."}}`;
    /// anything else is kept verbatim as the message.
    pub fn from_graph_response(status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let (code, message) = match parsed.as_ref().and_then(|v| v.get("error")) {
            Some(err) => (
                err.get("code")
                    .and_then(|c| c.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                err.get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or_default()
                    .to_string(),
            ),
            None => ("unknown".to_string(), body.trim().to_string()),
        };
        match status {
            401 | 403 => ConnectorError::Authentication(format!("{}: {}", code, message)),
            404 => ConnectorError::ResourceNotFound,
            _ => ConnectorError::Graph {
                status,
                code,
                message,
            },
        }
    }

    pub fn code_str(&self) -> &'static str {
        match self {
            ConnectorError::InvalidInput(_) => "invalid_input",
            ConnectorError::InvalidParams(_) => "invalid_params",
            ConnectorError::Authentication(_) => "auth_failed",
            ConnectorError::ResourceNotFound => "not_found",
            ConnectorError::ToolNotFound => "tool_not_found",
            ConnectorError::Timeout(_) => "timeout",
            ConnectorError::HttpRequest(_) => "upstream_error",
            ConnectorError::Graph { .. } => "upstream_error",
            ConnectorError::SerdeJson(_) => "parse_error",
            ConnectorError::Io(_) => "io_error",
            ConnectorError::Other(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_graph_error_envelope() {
        let body = r#"{"error":{"code":"InefficientFilter","message":"The restriction or sort order is too complex"}}"#;
        match ConnectorError::from_graph_response(400, body) {
            ConnectorError::Graph {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 400);
                assert_eq!(code, "InefficientFilter");
                assert!(message.contains("too complex"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn maps_auth_and_missing_statuses() {
        let e = ConnectorError::from_graph_response(401, "{}");
        assert_eq!(e.code_str(), "auth_failed");
        let e = ConnectorError::from_graph_response(404, "not json");
        assert!(matches!(e, ConnectorError::ResourceNotFound));
    }
}
