//! Chatbridge CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatbridge")]
#[command(about = "Relays messages between Slack and Mattermost channels")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "chatbridge.toml")]
    config: std::path::PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = chatbridge::BridgeConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    let bridge = chatbridge::Bridge::from_config(&config)?;
    bridge.start().await.context("bridge startup failed")?;
    tracing::info!("bridge started; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");
    bridge.stop().await;

    Ok(())
}
