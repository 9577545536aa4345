// parley
// Main entry point for the parley binary

use anyhow::Context;
use clap::Parser;
use parley_engine::cli::{Cli, Command};
use parley_engine::config::Config;
use parley_engine::handlers::{
    handle_chat, handle_models, handle_servers, handle_sessions, OutputFormat,
};
use parley_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let (config, config_path) = match &cli.config {
        Some(path) => (
            Config::load_from_path(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            path.clone(),
        ),
        None => (Config::load_or_create()?, Config::default_config_path()?),
    };

    // --log wins over the config file; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    tracing::info!(
        "parley v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Chat(args) => handle_chat(args, config, Some(config_path)).await,
        Command::Sessions { limit } => handle_sessions(limit, &config, format).await,
        Command::Models => handle_models(&config, format).await,
        Command::Servers => handle_servers(&config, format).await,
    }
}
