//! marksim - run trademark conflict simulations from the command line
//!
//! ## Commands
//!
//! - `run`: simulate a batch file in-process and print live progress
//! - `validate`: check a batch file without calling any collaborator

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use marksim_adapters::{HttpDocumentSource, OpenAiReasoningService};
use marksim_core::manager::validate_submission;
use marksim_core::{
    CachedDocumentSource, CandidateInput, EngineConfig, JobEvent, JobEventKind, JobManager,
    QueryContext, SimulationJob,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "marksim")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Trademark conflict simulations", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch and print each job event as it happens
    Run {
        /// Batch file: {"query": {...}, "candidates": [...]}
        #[arg(short, long)]
        input: PathBuf,

        /// Concurrent candidate pipelines (default from MARKSIM_MAX_CONCURRENCY)
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Write the final snapshot here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for per-candidate debug artifacts
        #[arg(long)]
        artifacts_dir: Option<PathBuf>,
    },

    /// Check a batch file without running it
    Validate {
        #[arg(short, long)]
        input: PathBuf,
    },
}

/// On-disk batch format, the same body `marksimd` accepts.
#[derive(Debug, Deserialize)]
struct Batch {
    #[serde(default)]
    query: QueryContext,
    candidates: Vec<CandidateInput>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    marksim_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            input,
            max_concurrency,
            output,
            artifacts_dir,
        } => {
            let batch = load_batch(&input)?;
            let mut config = EngineConfig::from_env();
            if let Some(n) = max_concurrency {
                config = config.with_max_concurrency(n);
            }
            if let Some(dir) = artifacts_dir {
                config = config.with_artifacts_dir(dir);
            }
            let documents =
                HttpDocumentSource::from_env().context("Failed to configure document service")?;
            let reasoning = OpenAiReasoningService::from_env()
                .context("Failed to configure reasoning service")?;
            let manager = JobManager::new(
                config,
                Arc::new(CachedDocumentSource::new(Arc::new(documents))),
                Arc::new(reasoning),
            )?;
            cmd_run(manager, batch, output.as_deref()).await.map(|_| ())
        }
        Commands::Validate { input } => cmd_validate(&input),
    }
}

fn load_batch(path: &Path) -> Result<Batch> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse batch file {}", path.display()))
}

fn cmd_validate(input: &Path) -> Result<()> {
    let batch = load_batch(input)?;
    validate_submission(&batch.candidates)?;
    println!(
        "{}: {} candidates for \"{}\"",
        input.display(),
        batch.candidates.len(),
        batch.query.trademark
    );
    Ok(())
}

async fn cmd_run(
    manager: Arc<JobManager>,
    batch: Batch,
    output: Option<&Path>,
) -> Result<SimulationJob> {
    let job_id = manager
        .create_job(batch.query, batch.candidates)
        .await
        .context("Batch rejected")?;
    info!(job_id = %job_id, "batch submitted");

    // Ctrl-C stops new candidates from starting; running ones finish.
    let cancel_manager = Arc::clone(&manager);
    let cancel_id = job_id.clone();
    let cancel_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(job_id = %cancel_id, "interrupt received, cancelling");
            let _ = cancel_manager.request_cancel(&cancel_id).await;
        }
    });

    let mut subscription = manager.subscribe(&job_id).await?;
    let mut finished = None;
    while let Some(event) = subscription.recv().await {
        println!("{}", event_line(&event));
        if event.is_terminal() {
            finished = Some(event.snapshot);
        }
    }
    cancel_task.abort();

    let job = match finished {
        Some(job) => job,
        None => manager.get_status(&job_id).await?,
    };

    let rendered = serde_json::to_string_pretty(&job)?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Report written to {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(job)
}

fn event_line(event: &JobEvent) -> String {
    let job = &event.snapshot;
    let settled = job
        .candidates
        .iter()
        .filter(|c| c.status.is_settled())
        .count();
    let progress = format!("{settled}/{}", job.candidates.len());

    let detail = match &event.kind {
        JobEventKind::Snapshot => format!("job {}", event.status),
        JobEventKind::StatusChanged => format!("job is now {}", event.status),
        JobEventKind::CancelRequested => "cancel requested".to_string(),
        JobEventKind::CandidateStarted { candidate_id } => {
            format!("candidate {candidate_id} started")
        }
        JobEventKind::CandidateSettled { candidate_id } => {
            let outcome = job
                .candidates
                .iter()
                .find(|c| &c.candidate_id == candidate_id)
                .map(|c| match &c.final_scores {
                    Some(s) => format!(
                        "{:?} (conflict {:.1}, registrability {:.1})",
                        c.status, s.conflict, s.registrability
                    ),
                    None => format!("{:?}", c.status),
                })
                .unwrap_or_default();
            format!("candidate {candidate_id} settled: {outcome}")
        }
        JobEventKind::Terminal => match &job.overall_report {
            Some(report) => format!("finished {}: {}", event.status, report.summary_text),
            None => format!("finished {}", event.status),
        },
    };
    format!("[{:>3}] {progress:>7} {detail}", event.seq)
}
