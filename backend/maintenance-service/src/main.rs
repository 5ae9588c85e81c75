//! Maintenance Service - Main entry point
//!
//! # Modes
//! - `schedule` (default): run every enabled job on its interval until Ctrl-C
//! - `once`: run the jobs selected with `--job` a single time and exit
//!   (`--job aggregation|references|activity|all`, default `all`)

use anyhow::Result;
use document_store::{DocumentStore, MemoryDocumentStore, PgDocumentStore, PgStoreConfig};
use maintenance_service::metrics::gather_metrics;
use maintenance_service::{build_jobs, run_jobs, run_once, Config, JobKind, StoreBackend};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Service run mode
#[derive(Debug, Clone, PartialEq)]
enum RunMode {
    /// Default: run all enabled jobs on their interval
    Schedule,
    /// Single pass over the selected jobs
    Once,
}

impl RunMode {
    fn from_args() -> Self {
        match arg_value("--mode").as_deref() {
            None | Some("schedule") => RunMode::Schedule,
            Some("once") => RunMode::Once,
            Some(other) => {
                warn!("Unknown mode '{}', using default 'schedule'", other);
                RunMode::Schedule
            }
        }
    }
}

/// Value following `flag` on the command line
fn arg_value(flag: &str) -> Option<String> {
    let args: Vec<String> = env::args().collect();
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// Jobs picked by `--job`; `all` (or no flag) means every enabled job
fn selected_jobs(config: &Config) -> Result<Vec<JobKind>> {
    match arg_value("--job").as_deref() {
        None | Some("all") => Ok(JobKind::enabled(config)),
        Some(name) => Ok(vec![name.parse::<JobKind>()?]),
    }
}

fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "maintenance_service=info,document_store=info,sqlx=warn".into());

    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn connect_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    match config.service.store_backend {
        StoreBackend::Postgres => {
            let store_config = PgStoreConfig::from_env(&config.service.service_name)?;
            let store = PgDocumentStore::connect(&store_config).await.map_err(|e| {
                error!("Failed to connect to document store: {}", e);
                anyhow::anyhow!("Document store connection error: {}", e)
            })?;
            info!("PostgreSQL document store initialized");
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory document store, nothing will be persisted");
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    init_tracing(config.service.json_logs);

    let mode = RunMode::from_args();
    info!(
        service = %config.service.service_name,
        store_backend = ?config.service.store_backend,
        "Starting maintenance service in {:?} mode",
        mode
    );

    let store = connect_store(&config).await?;

    match mode {
        RunMode::Once => run_once_mode(&config, store).await,
        RunMode::Schedule => run_schedule_mode(&config, store).await,
    }
}

/// Run the selected jobs one time; any failed job fails the process
async fn run_once_mode(config: &Config, store: Arc<dyn DocumentStore>) -> Result<()> {
    let kinds = selected_jobs(config)?;
    let jobs = build_jobs(config, store, &kinds);
    if jobs.is_empty() {
        warn!("No jobs selected, nothing to do");
        return Ok(());
    }

    let mut failed = Vec::new();
    for (job_name, result) in run_once(&jobs).await {
        match result {
            Ok(report) => info!(
                job_name,
                report = %serde_json::to_string(&report).unwrap_or_default(),
                "Job report"
            ),
            Err(_) => failed.push(job_name),
        }
    }

    debug!(metrics = %gather_metrics(), "Metrics after one-shot run");

    if !failed.is_empty() {
        anyhow::bail!("Maintenance jobs failed: {}", failed.join(", "));
    }
    Ok(())
}

/// Run every enabled job on the configured interval until Ctrl-C
async fn run_schedule_mode(config: &Config, store: Arc<dyn DocumentStore>) -> Result<()> {
    let kinds = JobKind::enabled(config);
    let jobs = build_jobs(config, store, &kinds);
    if jobs.is_empty() {
        warn!("All maintenance jobs are disabled, exiting");
        return Ok(());
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                let _ = signal_tx.send(());
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    info!(
        jobs = ?kinds,
        interval_secs = config.schedule.interval_secs,
        max_concurrent_jobs = config.schedule.max_concurrent_jobs,
        "Maintenance scheduler started"
    );

    run_jobs(
        jobs,
        Duration::from_secs(config.schedule.interval_secs),
        config.schedule.max_concurrent_jobs,
        &shutdown_tx,
    )
    .await;

    debug!(metrics = %gather_metrics(), "Metrics at shutdown");
    info!("Maintenance scheduler stopped");
    Ok(())
}
