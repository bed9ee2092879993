//! PDF gate - token-gated delivery of protected documents

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pdf_gate::{config::Args, server, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("pdf_gate={},info", log_level).into()),
        )
        .with((!args.log_json).then(|| tracing_subscriber::fmt::layer()))
        .with(args.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let settings = args.settings();

    info!("======================================");
    info!("  PDF gate");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Storage root: {}", args.storage_root.display());
    info!("Token TTL: {}s", settings.token_ttl_seconds);
    info!("Auto-issue on gate page: {}", settings.auto_issue_on_gate_page);
    info!("Block unmapped resources: {}", settings.block_unmapped_resources);
    info!("Gate URL template: {}", settings.gate_url_template);
    match settings.client_ip_header {
        Some(ref header) => info!("Client IP header: {}", header),
        None => info!("Client IP: socket peer address"),
    }
    info!("======================================");

    let state = AppState::from_args(&args).await?;
    info!(
        "Resolve cache TTL: {}s",
        state.resolver.cache().config().ttl.as_secs()
    );

    server::run(Arc::new(state), args.listen).await?;

    Ok(())
}
