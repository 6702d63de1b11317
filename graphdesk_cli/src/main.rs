use clap::Parser;
use owo_colors::OwoColorize;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod commands;
mod output;

use cli::{Cli, Commands, OutputFormat};
use commands::*;
use output::FormatError;

fn log_filter(verbose: u8) -> tracing_subscriber::EnvFilter {
    let default = match verbose {
        0 => "graphdesk_cli=info,graphdesk_core=warn",
        1 => "graphdesk_cli=debug,graphdesk_core=debug",
        _ => "graphdesk_cli=trace,graphdesk_core=trace",
    };
    tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into())
}

#[tokio::main]
async fn main() {
    let mut cli = Cli::parse();

    // Colors come from owo-colors escapes in the pretty formatter.
    let no_color = cli.no_color || std::env::var_os("NO_COLOR").is_some();
    if no_color && cli.output == OutputFormat::Pretty {
        cli.output = OutputFormat::Text;
    }

    tracing_subscriber::registry()
        .with(log_filter(cli.verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!no_color),
        )
        .init();

    let result = match &cli.command {
        Commands::Mail { action } => mail::run(&cli, action).await,
        Commands::Calendar { action } => calendar::run(&cli, action).await,
        Commands::Meeting { action } => meeting::run(&cli, action).await,
        Commands::Drive { action } => drive::run(&cli, action).await,
        Commands::Ask {
            query,
            llm,
            dry_run,
            patterns,
        } => ask::run(&cli, query, *llm, *dry_run, *patterns).await,
        Commands::Tools => tools::run(&cli).await,
        Commands::Call { tool, params, args } => call::run(&cli, tool, args.as_deref(), params).await,
        Commands::Config { action } => config::run(&cli, action).await,
        Commands::Login {
            tenant_id,
            client_id,
            scopes,
        } => login::run(&cli, tenant_id.as_deref(), client_id.as_deref(), scopes.as_deref()).await,
    };

    if let Err(e) = result {
        if cli.output == OutputFormat::Pretty {
            eprintln!("{}: {}", "Error".red().bold(), e.format_error());
        } else {
            eprintln!("Error: {}", e.format_error());
        }
        process::exit(1);
    }
}
