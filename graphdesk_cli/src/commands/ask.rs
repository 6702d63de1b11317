use crate::cli::Cli;
use crate::commands::{call_tool, connector, CommandError, Result};
use crate::output::{format_output, OutputData};
use graphdesk_core::connector::tool_catalog;
use graphdesk_core::router::{LlmRouter, QueryRouter, RoutedCall};
use tracing::{debug, warn};

pub async fn run(cli: &Cli, query: &[String], llm: bool, dry_run: bool, patterns: bool) -> Result<()> {
    let router = QueryRouter::new();
    if patterns {
        return format_output(&OutputData::Patterns(router.list_patterns()), &cli.output);
    }

    let query = query.join(" ");
    let call = route(cli, &router, &query, llm).await?.ok_or_else(|| {
        CommandError::InvalidArgs(format!(
            "could not route '{}'; try 'graphdesk ask --patterns' for supported questions",
            query
        ))
    })?;
    debug!(tool = %call.tool, confidence = call.confidence, "routed query");

    let result = if dry_run {
        None
    } else {
        Some(call_tool(cli, &call.tool, call.arguments.clone()).await?)
    };
    format_output(&OutputData::Routed { query, call, result }, &cli.output)
}

async fn route(cli: &Cli, router: &QueryRouter, query: &str, llm: bool) -> Result<Option<RoutedCall>> {
    if llm {
        match LlmRouter::from_auth(&connector(cli).merged_auth(), tool_catalog())? {
            Some(llm_router) => return Ok(llm_router.route(query).await),
            None => warn!("no llm_api_key configured; using the pattern router"),
        }
    }
    Ok(router.route(query))
}
