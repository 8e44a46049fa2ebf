use std::path::PathBuf;

use anyhow::{Context, Result};
use bnati_report::{report_summary_markdown, OutputMode, ReportBuilder, ReportConfig};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "bnati-cli")]
#[command(about = "Briefing note / ATI summary match report")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download the datasets and write the report once.
    Build {
        /// `json` or `sqlite`.
        #[arg(long)]
        output: Option<OutputMode>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Rebuild the report on the configured cron expression until interrupted.
    Schedule,
    /// Print a markdown summary of the last written report.json.
    Summary {
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = ReportConfig::from_env();

    match cli.command.unwrap_or(Commands::Build {
        output: None,
        out_dir: None,
        chunk_size: None,
    }) {
        Commands::Build {
            output,
            out_dir,
            chunk_size,
        } => {
            if let Some(output) = output {
                config.output_mode = output;
            }
            if let Some(out_dir) = out_dir {
                config.out_dir = out_dir;
            }
            if let Some(chunk_size) = chunk_size {
                config.chunk_size = chunk_size;
            }

            let summary = ReportBuilder::new(config)?.run_once().await?;
            println!(
                "build complete: run_id={} mode={} matches={} strong={} weak={} artifacts={}",
                summary.run_id,
                summary.output_mode,
                summary.counts.matches,
                summary.counts.strong_matches,
                summary.counts.weak_matches,
                summary
                    .artifacts
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            );
            for input in &summary.inputs {
                println!(
                    "input {}: rows={} bytes={} sha256={} from {}",
                    input.dataset.label(),
                    input.rows,
                    input.bytes,
                    input.sha256,
                    input.location
                );
            }
        }
        Commands::Schedule => {
            config.scheduler_enabled = true;
            let cron = config.cron.clone();
            let builder = ReportBuilder::new(config)?;
            let mut sched = builder
                .maybe_build_scheduler()
                .await?
                .context("scheduler was not built")?;
            sched.start().await.context("starting scheduler")?;
            info!(%cron, "scheduler running; press ctrl-c to stop");

            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Summary { out_dir } => {
            let out_dir = out_dir.unwrap_or(config.out_dir);
            println!("{}", report_summary_markdown(&out_dir)?);
        }
    }

    Ok(())
}
