//! attrsession - operator CLI for session stores on SimpleDB
//!
//! Main entry point for the attrsession CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;

mod commands;

use commands::{config, init, inspect, sweep, watch};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// attrsession - inspect and maintain session records stored in SimpleDB
#[derive(Parser)]
#[command(name = "attrsession")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file to use instead of discovery
    #[arg(short, long, global = true, env = "ATTRSESSION_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the stored record of a session
    Inspect(inspect::InspectArgs),

    /// Delete expired session records once
    Sweep(sweep::SweepArgs),

    /// Run the expiry sweeper until interrupted
    Watch(watch::WatchArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Create the SimpleDB domain
    Init(init::InitArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => attrsession_config::load_explicit(path)?,
        None => attrsession_config::load_config(None)?,
    };
    let logging = loaded.config.logging();

    // Initialize tracing: console on stderr, plus a rotating JSON file when enabled
    let filter = if cli.verbose {
        "attrsession=debug,info".to_string()
    } else {
        logging.filter.clone()
    };

    let (file_layer, _guard) = if logging.file {
        let log_dir = logging
            .dir
            .clone()
            .or_else(|| attrsession_config::user_config_dir().map(|d| d.join("logs")))
            .unwrap_or_else(|| PathBuf::from("logs"));
        let file_appender = tracing_appender::rolling::daily(&log_dir, "attrsession.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        (Some(non_blocking), Some(guard))
    } else {
        (None, None)
    };

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
                ),
        )
        .with(file_layer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(tracing_subscriber::EnvFilter::new("attrsession=trace,info"))
        }))
        .init();

    for warning in &loaded.warnings {
        warn!("{}", warning);
    }

    let ctx = commands::Context {
        config: loaded.config,
        sources: loaded.sources,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Inspect(args) => inspect::run(args, &ctx).await,
        Commands::Sweep(args) => sweep::run(args, &ctx).await,
        Commands::Watch(args) => watch::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
        Commands::Init(args) => init::run(args, &ctx).await,
    }
}
