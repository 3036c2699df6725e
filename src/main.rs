//! Parley server entry point

use anyhow::Result;
use clap::Parser;
use parley::AppConfig;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Real-time spoken conversation server")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<String>,

    /// Override the configured host
    #[arg(long, env = "PARLEY_HOST")]
    host: Option<String>,

    /// Override the configured port
    #[arg(short, long, env = "PARLEY_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    info!("Starting Parley conversation server");
    parley::gateway::serve(config).await?;

    Ok(())
}
