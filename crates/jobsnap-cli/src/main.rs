use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use jobsnap_pipeline::{Pipeline, PipelineConfig};

#[derive(Debug, Parser)]
#[command(name = "jobsnap")]
#[command(about = "Job-posting snapshot normalization and skill extraction")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Normalize the raw snapshot and extract skill mentions.
    Run {
        #[arg(long)]
        snapshot: Option<PathBuf>,
        #[arg(long)]
        taxonomy: Option<PathBuf>,
        #[arg(long)]
        tables_dir: Option<PathBuf>,
        #[arg(long)]
        reports_dir: Option<PathBuf>,
        /// Snapshot date (YYYY-MM-DD) used to resolve relative posting ages.
        #[arg(long)]
        reference_date: Option<NaiveDate>,
    },
    /// Print a markdown digest of the most recent runs.
    Report {
        #[arg(long, default_value_t = 3)]
        runs: usize,
        #[arg(long)]
        reports_dir: Option<PathBuf>,
    },
}

fn init_tracing() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("JOBSNAP_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run {
        snapshot: None,
        taxonomy: None,
        tables_dir: None,
        reports_dir: None,
        reference_date: None,
    }) {
        Commands::Run {
            snapshot,
            taxonomy,
            tables_dir,
            reports_dir,
            reference_date,
        } => {
            let mut config = PipelineConfig::from_env();
            if let Some(path) = snapshot {
                config.snapshot_path = path;
            }
            if let Some(path) = taxonomy {
                config.taxonomy_path = path;
            }
            if let Some(path) = tables_dir {
                config.tables_dir = path;
            }
            if let Some(path) = reports_dir {
                config.reports_dir = path;
            }
            if let Some(date) = reference_date {
                config.reference_date = date;
            }

            let summary = Pipeline::new(config).run_once().await?;
            println!(
                "run complete: run_id={} rows={} duplicates_dropped={} mentions={} tables={}",
                summary.run_id,
                summary.normalized_rows,
                summary.duplicates_dropped,
                summary.mention_rows,
                summary.tables_dir
            );
        }
        Commands::Report { runs, reports_dir } => {
            let root = reports_dir.unwrap_or_else(|| PipelineConfig::from_env().reports_dir);
            print!("{}", jobsnap_pipeline::report_runs_markdown(runs, root)?);
        }
    }

    Ok(())
}
