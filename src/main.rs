//! Conviction scoring system process entrypoint.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use conviction_engine::cli::commands;
use conviction_engine::config::Config;

#[derive(Parser)]
#[command(name = "conviction-engine")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the tracker with ingress adapters wired to an in-process event bus
    Run,

    /// Print the same summary as the /status endpoint
    Status,

    /// Print the active configuration with secrets masked
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("conviction_engine=info".parse().unwrap()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => commands::run(config).await,
        Commands::Status => commands::status(&config).await,
        Commands::ShowConfig => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
