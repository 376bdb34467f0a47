use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use marksim_adapters::{HttpDocumentSource, OpenAiReasoningService};
use marksim_core::{init_tracing, CachedDocumentSource, EngineConfig, JobManager};
use marksimd::{router, spawn_retention_sweeper, AppState};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "marksimd")]
#[command(about = "HTTP daemon for trademark conflict simulations", long_about = None)]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "MARKSIMD_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Emit JSON log lines
    #[arg(long, env = "MARKSIMD_JSON_LOGS")]
    json: bool,

    /// Default log level when RUST_LOG is unset
    #[arg(long, env = "MARKSIMD_LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Override the per-job concurrency cap
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Seconds between retention sweeps
    #[arg(long, env = "MARKSIMD_SWEEP_SECS", default_value_t = 60)]
    sweep_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json, args.log_level);

    let mut config = EngineConfig::from_env();
    if let Some(n) = args.max_concurrency {
        config = config.with_max_concurrency(n);
    }
    let retention = config.retention;

    let documents = HttpDocumentSource::from_env().context("document service client")?;
    let reasoning = OpenAiReasoningService::from_env().context("reasoning service client")?;
    let cache = Arc::new(CachedDocumentSource::new(Arc::new(documents)).with_ttl(retention));
    let manager = JobManager::new(config, cache.clone(), Arc::new(reasoning))?;

    let _sweeper = spawn_retention_sweeper(
        Arc::clone(&manager),
        Some(cache),
        Duration::from_secs(args.sweep_secs.max(1)),
        retention,
    );

    let app = router(AppState::new(manager));
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;

    tracing::info!(addr = %args.bind, version = marksim_core::VERSION, "marksimd listening");
    axum::serve(listener, app).await?;
    Ok(())
}
