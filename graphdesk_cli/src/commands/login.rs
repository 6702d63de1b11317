use crate::cli::{Cli, OutputFormat};
use crate::commands::{connector, Args, CommandError, Result};
use crate::output::{format_output, OutputData};
use graphdesk_core::auth_store::AuthStore;
use graphdesk_core::connector::PROVIDER;
use graphdesk_core::{CallToolRequestParam, Connector, GraphConnector, JsonObject};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

const DEFAULT_INTERVAL_SECS: u64 = 5;

pub async fn run(
    cli: &Cli,
    tenant_id: Option<&str>,
    client_id: Option<&str>,
    scopes: Option<&str>,
) -> Result<()> {
    let connector = connector(cli);
    remember(&connector, &[("tenant_id", tenant_id), ("client_id", client_id), ("scopes", scopes)])?;

    let start = invoke(&connector, "auth_start", Args::new().build()).await?;
    let device_code = start["device_code"]
        .as_str()
        .ok_or_else(|| CommandError::InvalidConfig("device authorization returned no device_code".to_string()))?
        .to_string();
    let url = start["verification_uri"].as_str().unwrap_or_default();
    let code = start["user_code"].as_str().unwrap_or_default();

    if cli.output == OutputFormat::Pretty {
        println!("Open {} and enter the code {}", url.cyan().underline(), code.yellow().bold());
        println!();
    } else {
        eprintln!("Open {} and enter the code {}", url, code);
    }

    let mut interval = start["interval"].as_u64().unwrap_or(DEFAULT_INTERVAL_SECS).max(1);
    let expires = Duration::from_secs(start["expires_in"].as_u64().unwrap_or(900));
    let began = Instant::now();

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message("Waiting for sign-in...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let outcome = loop {
        if began.elapsed() >= expires {
            break Err(CommandError::InvalidConfig(
                "device code expired before sign-in completed".to_string(),
            ));
        }
        tokio::time::sleep(Duration::from_secs(interval)).await;

        let poll = Args::new().set("device_code", device_code.as_str()).build();
        let status = match invoke(&connector, "auth_poll", poll).await {
            Ok(status) => status,
            Err(e) => break Err(e),
        };
        match status["status"].as_str() {
            Some("complete") => break Ok(status),
            Some("slow_down") => {
                interval += DEFAULT_INTERVAL_SECS;
                debug!(interval, "token endpoint asked to slow down");
            }
            _ => {}
        }
    };
    spinner.finish_and_clear();

    let status = outcome?;
    let scope = status["scope"].as_str().unwrap_or("(default)");
    let message = if cli.output == OutputFormat::Pretty {
        format!("{} Signed in. Granted scopes: {}", "OK".green().bold(), scope)
    } else {
        format!("signed in: {}", scope)
    };
    format_output(&OutputData::Message(message), &cli.output)
}

/// Persists login inputs so later token refreshes use the same app.
fn remember(connector: &GraphConnector, fields: &[(&str, Option<&str>)]) -> Result<()> {
    let given: Vec<(&str, &str)> = fields
        .iter()
        .filter_map(|(k, v)| v.map(str::trim).filter(|v| !v.is_empty()).map(|v| (*k, v)))
        .collect();
    if given.is_empty() {
        return Ok(());
    }
    let store = connector.store();
    let mut auth = store.load(PROVIDER).unwrap_or_default();
    for (k, v) in given {
        auth.insert(k.to_string(), v.to_string());
    }
    store
        .save(PROVIDER, &auth)
        .map_err(|e| CommandError::InvalidConfig(format!("failed to save: {}", e)))
}

async fn invoke(connector: &GraphConnector, tool: &str, arguments: JsonObject) -> Result<Value> {
    let result = connector
        .call_tool(CallToolRequestParam {
            name: tool.to_string().into(),
            arguments: Some(arguments),
        })
        .await?;
    Ok(result.structured_content.unwrap_or(Value::Null))
}
