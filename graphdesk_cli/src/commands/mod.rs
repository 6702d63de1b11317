pub mod ask;
pub mod calendar;
pub mod call;
pub mod config;
pub mod drive;
pub mod login;
pub mod mail;
pub mod meeting;
pub mod tools;

use crate::cli::{Cli, OutputFormat, Window};
use crate::output::{format_output, OutputData};
use graphdesk_core::auth::AuthDetails;
use graphdesk_core::{CallToolRequestParam, GraphConnector, JsonObject};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Tool '{0}' not found")]
    ToolNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("{0}")]
    Core(#[from] graphdesk_core::error::ConnectorError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, CommandError>;

/// Connector with the global `--mailbox` applied over stored credentials.
pub fn connector(cli: &Cli) -> GraphConnector {
    let mut explicit = AuthDetails::new();
    if let Some(mailbox) = cli.mailbox.as_deref().filter(|m| !m.trim().is_empty()) {
        explicit.insert("mailbox".to_string(), mailbox.trim().to_string());
    }
    GraphConnector::new(explicit)
}

/// Builds a JSON argument object, skipping unset values.
#[derive(Default)]
pub struct Args(JsonObject);

impl Args {
    pub fn new() -> Self {
        Self(JsonObject::new())
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn opt<T: Into<Value>>(mut self, key: &str, value: Option<T>) -> Self {
        if let Some(v) = value {
            self.0.insert(key.to_string(), v.into());
        }
        self
    }

    pub fn window(self, window: &Window) -> Self {
        self.opt("since", window.since.clone())
            .opt("until", window.until.clone())
    }

    pub fn build(self) -> JsonObject {
        self.0
    }
}

/// Calls a tool and returns its structured payload.
pub async fn call_tool(cli: &Cli, tool: &str, arguments: JsonObject) -> Result<Value> {
    use graphdesk_core::Connector;

    let spinner = (cli.output == OutputFormat::Pretty).then(|| {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(format!("Running {}...", tool));
        spinner.enable_steady_tick(std::time::Duration::from_millis(100));
        spinner
    });

    let request = CallToolRequestParam {
        name: tool.to_string().into(),
        arguments: Some(arguments),
    };
    let result = connector(cli).call_tool(request).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let result = result.map_err(|e| match e {
        graphdesk_core::error::ConnectorError::ToolNotFound => CommandError::ToolNotFound(tool.to_string()),
        other => CommandError::Core(other),
    })?;
    Ok(result.structured_content.unwrap_or(Value::Null))
}

/// Calls a tool and prints the result in the selected format.
pub async fn run_tool(cli: &Cli, tool: &str, arguments: JsonObject) -> Result<()> {
    let result = call_tool(cli, tool, arguments).await?;
    format_output(
        &OutputData::ToolResult {
            tool: tool.to_string(),
            result,
        },
        &cli.output,
    )
}
