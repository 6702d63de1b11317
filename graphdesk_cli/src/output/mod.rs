use crate::cli::OutputFormat;
use crate::commands::{CommandError, Result};
use graphdesk_core::router::{PatternInfo, RoutedCall};
use serde::Serialize;
use serde_json::Value;

mod pretty;
pub use pretty::format_pretty;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum OutputData {
    ToolsList(Value),
    ToolResult { tool: String, result: Value },
    Routed { query: String, call: RoutedCall, result: Option<Value> },
    Patterns(Vec<PatternInfo>),
    ConfigInfo(Value),
    Message(String),
}

pub fn format_output(data: &OutputData, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&payload(data))?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&payload(data))?),
        OutputFormat::Text => format_text_output(data)?,
        OutputFormat::Pretty => format_pretty_output(data),
    }
    Ok(())
}

/// Machine formats print the tool payload itself, not the wrapper.
fn payload(data: &OutputData) -> Value {
    match data {
        OutputData::ToolResult { result, .. } => result.clone(),
        OutputData::ToolsList(v) | OutputData::ConfigInfo(v) => v.clone(),
        other => serde_json::to_value(other).unwrap_or(Value::Null),
    }
}

fn format_text_output(data: &OutputData) -> Result<()> {
    match data {
        OutputData::ToolsList(tools) => {
            for t in tools.as_array().into_iter().flatten() {
                println!(
                    "{}\t{}",
                    t["name"].as_str().unwrap_or_default(),
                    t["description"].as_str().unwrap_or_default()
                );
            }
        }
        OutputData::ToolResult { result, .. } => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        OutputData::Routed { query, call, result } => {
            println!("{}\t{}\t{}", query, call.tool, serde_json::to_string(&call.arguments)?);
            if let Some(result) = result {
                println!("{}", serde_json::to_string_pretty(result)?);
            }
        }
        OutputData::Patterns(patterns) => {
            for p in patterns {
                println!("{}\t{}\t{}", p.tool, p.example, p.description);
            }
        }
        OutputData::ConfigInfo(config) => println!("{}", serde_json::to_string_pretty(config)?),
        OutputData::Message(msg) => println!("{}", msg),
    }
    Ok(())
}

fn format_pretty_output(data: &OutputData) {
    use owo_colors::OwoColorize;

    match data {
        OutputData::ToolsList(tools) => {
            println!("{}", "Available Tools".cyan().bold());
            println!();
            println!("{}", format_pretty(&serde_json::json!({ "tools": tools })));
        }
        OutputData::ToolResult { tool, result } => {
            println!("{} {}", "Result:".dimmed(), tool.cyan().bold());
            println!();
            println!("{}", format_pretty(result));
        }
        OutputData::Routed { query, call, result } => {
            println!(
                "{} {} {} {} {}",
                "Query:".dimmed(),
                query.cyan().bold(),
                "->".dimmed(),
                call.tool.green().bold(),
                format!("({:.0}% {})", call.confidence * 100.0, call.description).dimmed()
            );
            if !call.arguments.is_empty() {
                println!(
                    "{} {}",
                    "Arguments:".dimmed(),
                    Value::Object(call.arguments.clone())
                );
            }
            if let Some(result) = result {
                println!();
                println!("{}", format_pretty(result));
            }
        }
        OutputData::Patterns(patterns) => {
            println!("{}", "Supported Patterns".cyan().bold());
            println!();
            let value = serde_json::to_value(patterns).unwrap_or(Value::Null);
            println!("{}", format_pretty(&serde_json::json!({ "patterns": value })));
        }
        OutputData::ConfigInfo(config) => {
            println!("{}", "Configuration".cyan().bold());
            println!();
            println!("{}", format_pretty(config));
        }
        OutputData::Message(msg) => println!("{}", msg),
    }
}

pub trait FormatError {
    fn format_error(&self) -> String;
}

impl FormatError for CommandError {
    fn format_error(&self) -> String {
        match self {
            CommandError::ToolNotFound(tool) => {
                format!("Tool '{}' not found. Use 'graphdesk tools' to see available tools.", tool)
            }
            CommandError::Core(graphdesk_core::error::ConnectorError::Authentication(msg)) => {
                format!(
                    "{}. Configure credentials with 'graphdesk config set' or sign in with 'graphdesk login'.",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }
}
