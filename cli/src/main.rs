//! CLI for gputrace
//!
//! Commands:
//! - flags: toggle extended GPU metrics collection for running recorders
//! - config: show the effective recorder configuration
//! - files: list finished trace files
//! - synthetic: drive a recorder with a synthetic GPU workload

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "gputrace")]
#[command(about = "gputrace - GPU activity trace recorder", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML file overriding GPUTRACE_* environment settings
    #[arg(short, long, global = true, env = "GPUTRACE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn extended metrics collection on or off
    Flags(commands::flags::FlagsArgs),

    /// Print the effective recorder configuration
    Config,

    /// List finished trace files
    Files(commands::files::FilesArgs),

    /// Record a synthetic GPU workload
    Synthetic(commands::synthetic::SyntheticArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = commands::load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Flags(args) => commands::flags::run(&config, args),
        Commands::Config => commands::config::run(&config),
        Commands::Files(args) => commands::files::run(&config, args),
        Commands::Synthetic(args) => commands::synthetic::run(config, args),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
