//! Query subcommands

use chrono::{DateTime, Duration, Utc};
use clap::{Args, Subcommand};
use meterline_engine::{EngineError, MeterEngine};
use meterline_types::SourceId;
use serde::Serialize;
use serde_json::Value;

use crate::error::{CliError, CliResult};

/// Source plus closed time interval
#[derive(Debug, Clone, Args)]
pub struct IntervalArgs {
    /// Source id
    #[arg(short, long)]
    pub source: String,

    /// Interval start (RFC 3339)
    #[arg(long)]
    pub start: DateTime<Utc>,

    /// Interval end (RFC 3339)
    #[arg(long)]
    pub end: DateTime<Utc>,
}

/// Available queries
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Instantaneous power at an instant
    Power {
        /// Source id
        #[arg(short, long)]
        source: String,

        /// Instant to interpolate at (RFC 3339)
        #[arg(long)]
        at: DateTime<Utc>,
    },

    /// Energy over an interval, in Wh
    Energy(IntervalArgs),

    /// Carbon over an interval, in lbs CO2
    Carbon(IntervalArgs),

    /// Mean power over an interval, in W
    AveragePower(IntervalArgs),

    /// Energy per fixed-length bucket
    Profile {
        #[command(flatten)]
        interval: IntervalArgs,

        /// Bucket length in seconds
        #[arg(long, default_value_t = 3600)]
        step_secs: u64,
    },

    /// Leaves contributing to a source, in summation order
    Flatten {
        /// Source id
        #[arg(short, long)]
        source: String,
    },

    /// List configured sources
    Sources,

    /// Checkpoint cache counters after loading the fixture
    CacheStats,
}

#[derive(Debug, Serialize)]
struct Quantity {
    source: String,
    quantity: &'static str,
    unit: &'static str,
    value: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<DateTime<Utc>>,
}

impl Quantity {
    fn over(args: &IntervalArgs, quantity: &'static str, unit: &'static str, value: f64) -> Self {
        Self {
            source: args.source.clone(),
            quantity,
            unit,
            value,
            at: None,
            start: Some(args.start),
            end: Some(args.end),
        }
    }
}

/// Run one query and return its JSON report.
pub async fn execute(command: Command, engine: &MeterEngine) -> CliResult<Value> {
    let ctx = engine.context();

    let report = match command {
        Command::Power { source, at } => {
            let value = engine.power(&ctx, &SourceId::new(&source), at).await?;
            serde_json::to_value(Quantity {
                source,
                quantity: "power",
                unit: "W",
                value,
                at: Some(at),
                start: None,
                end: None,
            })?
        }
        Command::Energy(args) => {
            let value = engine
                .energy(&ctx, &SourceId::new(&args.source), args.start, args.end)
                .await?;
            serde_json::to_value(Quantity::over(&args, "energy", "Wh", value))?
        }
        Command::Carbon(args) => {
            let value = engine
                .carbon(&ctx, &SourceId::new(&args.source), args.start, args.end)
                .await?;
            serde_json::to_value(Quantity::over(&args, "carbon", "lbs_co2", value))?
        }
        Command::AveragePower(args) => {
            let value = engine
                .average_power(&ctx, &SourceId::new(&args.source), args.start, args.end)
                .await?;
            serde_json::to_value(Quantity::over(&args, "average_power", "W", value))?
        }
        Command::Profile {
            interval,
            step_secs,
        } => {
            let step = i64::try_from(step_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .ok_or_else(|| CliError::InvalidInput(format!("step too large: {}", step_secs)))?;
            let buckets = engine
                .energy_profile(
                    &ctx,
                    &SourceId::new(&interval.source),
                    interval.start,
                    interval.end,
                    step,
                )
                .await?;
            serde_json::to_value(buckets)?
        }
        Command::Flatten { source } => {
            let leaves = engine.flatten(&SourceId::new(source)).await?;
            serde_json::to_value(leaves)?
        }
        Command::Sources => {
            let sources = engine.catalog().list().await.map_err(EngineError::from)?;
            serde_json::to_value(sources)?
        }
        Command::CacheStats => serde_json::to_value(engine.cache_stats())?,
    };

    Ok(report)
}
