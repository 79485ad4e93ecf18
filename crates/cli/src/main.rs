//! Fleet Footprint CLI
//!
//! Attributes cost, energy and carbon to the resources in a data snapshot
//! and estimates the savings available from common optimization strategies.

mod commands;
mod config;
mod output;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use commands::{report, runtime, Session};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Fleet Footprint CLI
#[derive(Parser)]
#[command(name = "footprint")]
#[command(author, version, about = "Fleet Footprint: cost and carbon attribution for cloud fleets", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ~/.config/footprint/config.toml)
    #[arg(long, env = "FOOTPRINT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Attribute cost, energy and carbon for every resource in a region
    Report {
        /// JSON data snapshot to read sources from
        #[arg(long, short)]
        snapshot: PathBuf,

        /// Region to attribute
        #[arg(long, short)]
        region: String,

        /// Window start (RFC 3339)
        #[arg(long)]
        from: DateTime<Utc>,

        /// Window end (RFC 3339)
        #[arg(long)]
        to: DateTime<Utc>,
    },

    /// Show ledger validation and savings scenarios for a region
    Scenarios {
        /// JSON data snapshot to read sources from
        #[arg(long, short)]
        snapshot: PathBuf,

        /// Region to attribute
        #[arg(long, short)]
        region: String,

        /// Window start (RFC 3339)
        #[arg(long)]
        from: DateTime<Utc>,

        /// Window end (RFC 3339)
        #[arg(long)]
        to: DateTime<Utc>,
    },

    /// Reconstruct running intervals for a single resource
    Runtime {
        /// JSON data snapshot to read sources from
        #[arg(long, short)]
        snapshot: PathBuf,

        /// Resource identifier
        #[arg(long)]
        resource: String,

        /// Window start (RFC 3339)
        #[arg(long)]
        from: DateTime<Utc>,

        /// Window end (RFC 3339)
        #[arg(long)]
        to: DateTime<Utc>,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Structured output when verbose, plain otherwise; stdout stays reserved for results
    let json_layer = verbose.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let plain_layer = (!verbose).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(plain_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let engine_config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Report {
            snapshot,
            region,
            from,
            to,
        } => {
            let session = Session::open(&snapshot, engine_config)?;
            report::show_report(&session, &region, commands::window(from, to)?, cli.format).await?;
        }
        Commands::Scenarios {
            snapshot,
            region,
            from,
            to,
        } => {
            let session = Session::open(&snapshot, engine_config)?;
            report::show_scenarios(&session, &region, commands::window(from, to)?, cli.format)
                .await?;
        }
        Commands::Runtime {
            snapshot,
            resource,
            from,
            to,
        } => {
            let session = Session::open(&snapshot, engine_config)?;
            runtime::show_runtime(&session, &resource, commands::window(from, to)?, cli.format)
                .await?;
        }
    }

    Ok(())
}
