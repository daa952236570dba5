//! Bulwark CLI - validate configuration, simulate operations, check health.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bulwark")]
#[command(about = "Multi-provider fallback and offline resilience engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a configuration file against the schema and semantic rules
    Validate {
        config: PathBuf,

        /// Print the parsed configuration as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one operation through the engine with scripted backends
    Simulate {
        config: PathBuf,

        /// Operation to execute
        #[arg(long)]
        operation: String,

        /// JSON parameters for the operation
        #[arg(long, default_value = "{}")]
        params: String,

        /// Provider to force into failure (repeatable)
        #[arg(long = "fail")]
        fail: Vec<String>,

        /// Pretend the host is offline
        #[arg(long)]
        offline: bool,
    },

    /// Run every health check once
    Health {
        config: PathBuf,

        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Write a diagnostics report
    Diagnostics {
        config: PathBuf,

        /// Report file
        #[arg(long, short)]
        output: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate { config, json } => commands::validate(&config, json),
        Commands::Simulate {
            config,
            operation,
            params,
            fail,
            offline,
        } => commands::simulate(&config, &operation, &params, &fail, offline).await,
        Commands::Health { config, json } => commands::health(&config, json).await,
        Commands::Diagnostics { config, output } => commands::diagnostics(&config, &output).await,
    }
}
