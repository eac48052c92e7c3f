//! turnstore CLI
//!
//! Main entry point for the turnstore command-line tool.
//! Appends conversational turns to a durable log and retrieves similar chunks.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use commands::{AppendCommand, QueryCommand, RebuildCommand, StatsCommand};
use std::path::PathBuf;
use turnstore_core::{config::AppConfig, logging};

/// turnstore - durable conversational memory with embedding search
#[derive(Parser, Debug)]
#[command(name = "turnstore")]
#[command(about = "Durable conversational memory with embedding search", long_about = None)]
#[command(version)]
struct Cli {
    /// Storage directory (default: ./.turnstore)
    #[arg(short, long, global = true, env = "TURNSTORE_DIR")]
    dir: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "TURNSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Append a turn (or one turn per stdin line)
    Append(AppendCommand),

    /// Retrieve the chunks most similar to a text
    Query(QueryCommand),

    /// Show store statistics
    Stats(StatsCommand),

    /// Rebuild the index from the record log
    Rebuild(RebuildCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    let moved = cli.dir.is_some() || cli.config.is_some();
    let config = AppConfig::load()
        .context("Failed to load configuration")?
        .with_overrides(cli.dir, cli.config, None, false, false);

    // A different directory or config path means a different config file
    let config = if moved {
        config
            .reload_file()
            .context("Failed to load configuration")?
    } else {
        config
    };

    let config = config.with_overrides(None, None, cli.log_level, cli.verbose, cli.no_color);
    config.validate().context("Invalid configuration")?;

    // Initialize logging with final configuration
    logging::init_logging(config.log_level.as_deref(), config.no_color)?;

    tracing::info!("turnstore starting");
    tracing::debug!("Directory: {:?}", config.directory);
    tracing::debug!(
        "Embedding: {}/{}",
        config.embedding.provider,
        config.embedding.model
    );

    let command_name = match &cli.command {
        Commands::Append(_) => "append",
        Commands::Query(_) => "query",
        Commands::Stats(_) => "stats",
        Commands::Rebuild(_) => "rebuild",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    // Route to command handlers
    let result = match cli.command {
        Commands::Append(cmd) => cmd.execute(&config).await,
        Commands::Query(cmd) => cmd.execute(&config).await,
        Commands::Stats(cmd) => cmd.execute(&config).await,
        Commands::Rebuild(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result.with_context(|| format!("{} failed", command_name))
}
