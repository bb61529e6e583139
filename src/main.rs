//! QTrader — event-driven backtest/simulation engine.
//!
//! Three subcommands: `backtest` runs a fresh deterministic backtest,
//! `resume` continues a paused run from its snapshot envelope, and `fork`
//! branches a new run off an earlier point in an existing snapshot.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "qtrader")]
#[command(about = "Event-driven backtest and simulation engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a fresh backtest from a configuration file
    Backtest {
        #[arg(short, long, default_value = "configs/backtest.json")]
        config: String,
    },

    /// Resume a paused run from its snapshot envelope
    Resume {
        #[arg(short, long, default_value = "configs/backtest.json")]
        config: String,

        #[arg(short, long)]
        snapshot: String,
    },

    /// Fork a new run off an earlier point in an existing snapshot
    Fork {
        #[arg(short, long)]
        snapshot: String,

        /// Date to truncate history before, YYYY-MM-DD
        #[arg(long)]
        fork_date: String,

        /// Clear carried-over user_data, forcing strategy re-initialization
        #[arg(long)]
        reinitialize: bool,

        #[arg(short, long)]
        output: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(log_path = %log_path.display(), "logging initialized");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Backtest { .. } => "backtest",
        Commands::Resume { .. } => "resume",
        Commands::Fork { .. } => "fork",
    };
    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Backtest { config } => commands::backtest::run(config),
        Commands::Resume { config, snapshot } => commands::resume::run(config, snapshot),
        Commands::Fork { snapshot, fork_date, reinitialize, output } => {
            commands::fork::run(snapshot, fork_date, reinitialize, output)
        }
    }
}
