use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use lrec_storage::{ArtifactStore, PgStore};
use lrec_sync::{maybe_build_scheduler, report_daily_markdown, ReconConfig, ReconPipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "lrec-cli")]
#[command(about = "Listing export reconciliation command-line interface")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile one day's exports against the previous day.
    Ingest {
        /// Defaults to today's local date.
        #[arg(long)]
        day: Option<NaiveDate>,
        #[arg(long)]
        no_report: bool,
    },
    /// Apply database migrations.
    Migrate,
    /// Copy a downloaded export into the day layout.
    Stage {
        #[arg(long)]
        day: Option<NaiveDate>,
        #[arg(long)]
        region: String,
        path: PathBuf,
    },
    /// Write Parquet files for a committed day.
    Export {
        #[arg(long)]
        day: Option<NaiveDate>,
    },
    /// Print an index of recent day reports.
    Report {
        #[arg(long, default_value_t = 7)]
        runs: usize,
    },
    /// Run the cron scheduler until interrupted.
    Schedule,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lrec=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let config = ReconConfig::from_env();
    let today = || Local::now().date_naive();

    match cli.command.unwrap_or(Commands::Ingest {
        day: None,
        no_report: false,
    }) {
        Commands::Ingest { day, no_report } => {
            let day = day.unwrap_or_else(today);
            let pipeline = ReconPipeline::connect(config).await?;
            match pipeline.run(day).await {
                Ok(summary) => {
                    if !no_report {
                        let report_dir = pipeline.write_report(&summary).await?;
                        info!(report_dir = %report_dir.display(), "day report written");
                    }
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                }
                Err(err) => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({
                            "day": err.day,
                            "error": err.to_string(),
                        }))?
                    );
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Commands::Migrate => {
            let store = PgStore::connect(&config.store_config())
                .await
                .context("connecting to the reconciliation database")?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Stage { day, region, path } => {
            let day = day.unwrap_or_else(today);
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let staged = ArtifactStore::new(&config.data_dir)
                .stage_export(day, &region, &bytes)
                .await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "day": day,
                    "path": staged.absolute_path.display().to_string(),
                    "sha256": staged.content_hash,
                    "bytes": staged.byte_size,
                    "deduplicated": staged.deduplicated,
                }))?
            );
        }
        Commands::Export { day } => {
            let day = day.unwrap_or_else(today);
            let pipeline = ReconPipeline::connect(config).await?;
            let manifest = pipeline.export(day).await?;
            println!("export complete: manifest={}", manifest.display());
        }
        Commands::Report { runs } => {
            println!("{}", report_daily_markdown(runs, &config.reports_dir)?);
        }
        Commands::Schedule => {
            let pipeline = Arc::new(ReconPipeline::connect(config).await?);
            let Some(scheduler) = maybe_build_scheduler(pipeline).await? else {
                bail!("scheduler is disabled; set LREC_SCHEDULER_ENABLED=true");
            };
            scheduler.start().await.context("starting scheduler")?;
            info!("scheduler running; press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
