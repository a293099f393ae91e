//! meterctl - query energy meter fixtures from the command line
//!
//! Loads source definitions and readings from a JSON fixture into an
//! in-memory meterline engine, then answers one query:
//! - power at an instant, energy, carbon or mean power over an interval
//! - per-bucket energy profiles
//! - source graph flattening and cache counters

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Parser;
use meterline_engine::{Clock, ManualClock, SystemClock};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod error;
mod fixture;
mod output;

use crate::commands::Command;
use crate::config::{CliConfig, LoggingConfig};
use crate::error::CliResult;
use crate::fixture::Fixture;

/// meterctl CLI
#[derive(Parser)]
#[command(name = "meterctl")]
#[command(about = "Meterline - energy, power and carbon queries over meter fixtures", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "METERLINE_CONFIG")]
    config: Option<String>,

    /// Fixture file with sources and readings
    #[arg(short, long, env = "METERLINE_FIXTURE")]
    fixture: PathBuf,

    /// Pin "now" (RFC 3339) instead of reading the system clock
    #[arg(long)]
    now: Option<DateTime<Utc>>,

    /// Log level
    #[arg(long, env = "METERLINE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "METERLINE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        output::print_error(&err);
        std::process::exit(err.exit_code());
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.log_json {
        config.logging.json = true;
    }
    init_tracing(&config.logging);

    let clock: Arc<dyn Clock> = match cli.now {
        Some(now) => Arc::new(ManualClock::new(now)),
        None => Arc::new(SystemClock),
    };

    let engine = Fixture::load(&cli.fixture)?
        .into_engine(config.engine, clock)
        .await?;
    let report = commands::execute(cli.command, &engine).await?;
    output::print_json(&report)
}

// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.clone().into());

    if logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
