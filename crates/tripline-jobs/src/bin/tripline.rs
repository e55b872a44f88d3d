//! tripline: command-line driver for the booking pipeline.
//!
//! Imports email records, runs pipeline stages in slices, resets stages and
//! prints status reports. Every command prints JSON on stdout; logs go to
//! stderr or `LOG_FILE`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tripline_core::{AggregationScope, EmailRecord, Repositories, Stage};
use tripline_db::{log_pool_usage, Database, MemoryStore};
use tripline_jobs::{Pipeline, ResetTarget};

#[derive(Parser)]
#[command(name = "tripline")]
#[command(author, version, about = "Email to trip pipeline for travel bookings")]
#[command(propagate_version = true)]
struct Cli {
    /// PostgreSQL URL (default: DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Use a throwaway in-memory store instead of PostgreSQL
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import email records from a JSON array file
    Ingest {
        /// File holding `[{id, subject, sender, date, raw_content}]`
        file: PathBuf,
    },

    /// Run pipeline stages until no eligible email is left
    Run {
        /// Stages to run (default: all, in pipeline order)
        #[arg(short, long, num_args = 1..)]
        stage: Vec<Stage>,
    },

    /// Return rows of one stage to pending
    Reset {
        /// Stage to reset
        #[arg(short, long)]
        stage: Stage,

        /// Reset every failed row
        #[arg(long, conflicts_with_all = ["stuck", "ids"])]
        failed: bool,

        /// Reset rows left processing by an interrupted run
        #[arg(long, conflicts_with = "ids")]
        stuck: bool,

        /// Email ids to reset
        ids: Vec<String>,
    },

    /// Run one trip aggregation pass
    Aggregate {
        /// First day of the window; overlapping trips are rebuilt whole (requires --to)
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        /// Last day of the window
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
    },

    /// Print per-stage status counts
    Report,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_logging();

    let cli = Cli::parse();
    let (repos, db) = open_repositories(&cli).await?;
    let pipeline = Pipeline::from_env(repos).context("failed to assemble pipeline")?;

    let op = match cli.command {
        Commands::Ingest { .. } => "ingest",
        Commands::Run { .. } => "run",
        Commands::Reset { .. } => "reset",
        Commands::Aggregate { .. } => "aggregate",
        Commands::Report => "report",
    };
    match cli.command {
        Commands::Ingest { file } => {
            let records = read_records(&file)?;
            let summary = pipeline.ingest(&records).await?;
            print_json(&summary)?;
        }
        Commands::Run { stage } => {
            let stages = if stage.is_empty() {
                Stage::ALL.to_vec()
            } else {
                stage
            };
            let handle = pipeline.handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Stop requested; finishing the current slice");
                    handle.cancel();
                }
            });
            let report = pipeline.run(&stages).await?;
            print_json(&report)?;
        }
        Commands::Reset {
            stage,
            failed,
            stuck,
            ids,
        } => {
            let target = if failed {
                ResetTarget::Failed
            } else if stuck {
                ResetTarget::Stuck
            } else if !ids.is_empty() {
                ResetTarget::Ids(ids)
            } else {
                anyhow::bail!("reset needs --failed, --stuck or at least one email id");
            };
            let reset = pipeline.reset(stage, target).await?;
            print_json(&serde_json::json!({ "stage": stage, "reset": reset }))?;
        }
        Commands::Aggregate { from, to } => {
            let scope = match (from, to) {
                (Some(start), Some(end)) => AggregationScope::DateRange { start, end },
                _ => AggregationScope::All,
            };
            let report = pipeline.aggregate(scope).await?;
            print_json(&report)?;
        }
        Commands::Report => {
            let report = pipeline.status_report().await?;
            print_json(&report)?;
        }
    }
    if let Some(db) = &db {
        log_pool_usage(db.pool(), op);
    }
    Ok(())
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: "tripline=info")
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "tripline=info,tripline_jobs=info,tripline_trips=info,tripline_inference=info".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = Path::new(path).parent().unwrap_or(Path::new("."));
        let file_name = Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("tripline.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // stdout carries the JSON result
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}

async fn open_repositories(cli: &Cli) -> anyhow::Result<(Repositories, Option<Database>)> {
    if cli.memory {
        info!("Using in-memory store");
        return Ok((MemoryStore::new().repositories(), None));
    }
    let url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .context("DATABASE_URL is not set; pass --database-url or --memory")?;
    let db = Database::connect(&url)
        .await
        .context("failed to connect to database")?;
    db.migrate().await.context("failed to run migrations")?;
    Ok((db.repositories(), Some(db)))
}

fn read_records(path: &Path) -> anyhow::Result<Vec<EmailRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let records: Vec<EmailRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of email records", path.display()))?;
    Ok(records)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
