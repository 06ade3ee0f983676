// Ember inference service
// Main entry point for the ember binary

use clap::Parser;
use ember_engine::cli::{Cli, Command, ConfigAction};
use ember_engine::config::Config;
use ember_engine::handlers::{
    handle_ask, handle_chat, handle_config_path, handle_config_show, handle_stats, OutputFormat,
};
use ember_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    tracing::info!(
        "Ember v{} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH")
    );

    // Handle commands
    match cli.command {
        Command::Ask {
            prompt,
            model,
            system,
        } => handle_ask(prompt, model, system, &config, format).await,

        Command::Chat { model, system } => handle_chat(model, system, &config, format).await,

        Command::Stats { requests, model } => handle_stats(requests, model, &config, format).await,

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
            ConfigAction::Path => handle_config_path(cli.config.as_deref(), format),
        },
    }
}
