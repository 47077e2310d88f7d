//! newsrag CLI
//!
//! Main entry point for the newsrag command-line tool.
//! Ingests scraped news articles and answers similarity queries over them.

mod commands;

use clap::{Parser, Subcommand};
use commands::{IngestCommand, InitCommand, QueryCommand, RebuildCommand, StatsCommand};
use newsrag_core::{config::AppConfig, logging, AppResult};
use std::path::PathBuf;

/// newsrag - vector retrieval over scraped news articles
#[derive(Parser, Debug)]
#[command(name = "newsrag")]
#[command(about = "Vector retrieval over scraped news articles", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "NEWSRAG_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "NEWSRAG_CONFIG")]
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
    /// Create the data directory, store and index configuration
    Init(InitCommand),

    /// Upsert articles from JSON or JSON Lines files
    Ingest(IngestCommand),

    /// Find the articles most similar to a text
    Query(QueryCommand),

    /// Rebuild the vector index from the store
    Rebuild(RebuildCommand),

    /// Show store and index statistics
    Stats(StatsCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    let config = AppConfig::load()?.with_overrides(
        cli.workspace,
        cli.config,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    )?;

    logging::init_logging(config.log_level.as_deref(), config.no_color)?;

    tracing::info!("newsrag starting");
    tracing::debug!("Workspace: {:?}", config.workspace);

    config.ensure_data_dir()?;

    let command_name = match &cli.command {
        Commands::Init(_) => "init",
        Commands::Ingest(_) => "ingest",
        Commands::Query(_) => "query",
        Commands::Rebuild(_) => "rebuild",
        Commands::Stats(_) => "stats",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Init(cmd) => cmd.execute(&config).await,
        Commands::Ingest(cmd) => cmd.execute(&config).await,
        Commands::Query(cmd) => cmd.execute(&config).await,
        Commands::Rebuild(cmd) => cmd.execute(&config).await,
        Commands::Stats(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
