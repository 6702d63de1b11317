use std::process;

use graphdesk_core::GraphConnector;
use graphdesk_server::{parse_bind, parse_cors_origins, serve, AppState, ServerError, DEFAULT_BIND};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graphdesk_server=info,graphdesk_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        error!("{}", e);
        process::exit(1);
    }
}

async fn run() -> Result<(), ServerError> {
    let bind = std::env::var("GRAPHDESK_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let addr = parse_bind(&bind)?;
    let listener = TcpListener::bind(addr).await?;
    let origins = parse_cors_origins(&std::env::var("GRAPHDESK_CORS_ORIGINS").unwrap_or_default())?;
    let state = AppState::new(GraphConnector::new(Default::default())).with_cors_origins(origins);
    serve(listener, state, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
    })
    .await
}
