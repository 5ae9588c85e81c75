//! Maintenance jobs
//!
//! Scheduled passes over the progress data:
//! - answer aggregation (counters, difficulty, log consumption)
//! - dangling answer reference cleanup
//! - daily activity pruning
//!
//! Every job restarts from a fresh scan, so a run cancelled at any await
//! point or rejected halfway is repaired by the next one.

use crate::committer::CommitReport;
use crate::config::Config;
use crate::error::{MaintenanceError, MaintenanceResult};
use crate::metrics::helpers::{record_job_failure, record_job_success, set_consecutive_failures};
use async_trait::async_trait;
use document_store::DocumentStore;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::{interval, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod activity_pruning;
pub mod aggregation;
pub mod reference_cleanup;

pub use activity_pruning::ActivityPruningJob;
pub use aggregation::{AggregationJob, AggregationStage};
pub use reference_cleanup::ReferenceCleanupJob;

/// Per-run context carried into every log line of a job run
#[derive(Debug, Clone)]
pub struct JobContext {
    pub correlation_id: String,
}

impl JobContext {
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
        }
    }
}

impl Default for JobContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of one job run
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobReport {
    pub job: String,
    pub correlation_id: String,
    pub documents_scanned: usize,
    /// Mutation intents produced by the builders
    pub intents_built: usize,
    pub malformed: usize,
    pub skipped_references: usize,
    pub commit: CommitReport,
    pub elapsed_ms: u64,
}

impl JobReport {
    pub fn new(job: &str, ctx: &JobContext) -> Self {
        Self {
            job: job.to_string(),
            correlation_id: ctx.correlation_id.clone(),
            ..Default::default()
        }
    }

    /// Fold a stage's commit into the run totals.
    ///
    /// Rejected write groups surface as a `PartialCommit` error carrying the
    /// totals so far.
    pub fn absorb_commit(&mut self, stage: &str, commit: CommitReport) -> MaintenanceResult<()> {
        let failed_groups = commit.groups_failed;
        let total_groups = commit.total_groups();
        self.commit.absorb(commit);
        if failed_groups == 0 {
            return Ok(());
        }
        Err(MaintenanceError::PartialCommit {
            job: self.job.clone(),
            stage: stage.to_string(),
            failed_groups,
            total_groups,
            commit: Box::new(self.commit.clone()),
        })
    }
}

/// Rejects a second `execute()` on the same job instance while one is in flight.
///
/// The scheduler loop awaits each run before its next tick, so this only
/// matters for callers sharing a job across tasks.
#[derive(Debug, Default)]
pub struct RunGuard {
    running: AtomicBool,
}

/// Held for the duration of a run; releases the guard on drop.
#[derive(Debug)]
pub struct RunPermit<'a> {
    running: &'a AtomicBool,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, job: &str) -> MaintenanceResult<RunPermit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| MaintenanceError::AlreadyRunning(job.to_string()))?;
        Ok(RunPermit {
            running: &self.running,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for RunPermit<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Unified interface for maintenance jobs
///
/// Implementors provide the pipeline in [`MaintenanceJob::run`]; callers use
/// [`MaintenanceJob::execute`], which adds the run guard, a fresh correlation
/// id, logging and metrics.
#[async_trait]
pub trait MaintenanceJob: Send + Sync {
    /// Job name (used in logs and metric labels)
    fn name(&self) -> &'static str;

    fn run_guard(&self) -> &RunGuard;

    /// One full pass: scan, build, commit
    async fn run(&self, ctx: &JobContext) -> MaintenanceResult<JobReport>;

    /// Scheduling entry point
    async fn execute(&self) -> MaintenanceResult<JobReport> {
        let _permit = self.run_guard().try_acquire(self.name())?;
        let ctx = JobContext::new();
        let start = Instant::now();

        info!(
            correlation_id = %ctx.correlation_id,
            job_name = self.name(),
            "Starting maintenance job"
        );

        match self.run(&ctx).await {
            Ok(mut report) => {
                report.elapsed_ms = start.elapsed().as_millis() as u64;
                record_job_success(self.name(), report.elapsed_ms, &report);
                info!(
                    correlation_id = %ctx.correlation_id,
                    job_name = self.name(),
                    documents_scanned = report.documents_scanned,
                    intents_built = report.intents_built,
                    intents_applied = report.commit.intents_applied(),
                    groups_committed = report.commit.groups_committed,
                    malformed = report.malformed,
                    skipped_references = report.skipped_references,
                    elapsed_ms = report.elapsed_ms,
                    "Maintenance job completed"
                );
                Ok(report)
            }
            Err(e) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                let commit = match &e {
                    MaintenanceError::PartialCommit { commit, .. } => Some(commit.as_ref()),
                    _ => None,
                };
                record_job_failure(self.name(), elapsed_ms, commit);
                error!(
                    correlation_id = %ctx.correlation_id,
                    job_name = self.name(),
                    error = %e,
                    elapsed_ms,
                    "Maintenance job failed"
                );
                Err(e)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Aggregation,
    ReferenceCleanup,
    ActivityPruning,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [
        JobKind::Aggregation,
        JobKind::ReferenceCleanup,
        JobKind::ActivityPruning,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Aggregation => "aggregation",
            JobKind::ReferenceCleanup => "references",
            JobKind::ActivityPruning => "activity",
        }
    }

    /// Kinds switched on in the configuration, in run order
    pub fn enabled(config: &Config) -> Vec<JobKind> {
        Self::ALL
            .into_iter()
            .filter(|kind| match kind {
                JobKind::Aggregation => config.schedule.aggregation_enabled,
                JobKind::ReferenceCleanup => config.schedule.reference_cleanup_enabled,
                JobKind::ActivityPruning => config.schedule.activity_pruning_enabled,
            })
            .collect()
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JobKind {
    type Err = MaintenanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aggregation" => Ok(JobKind::Aggregation),
            "references" | "reference-cleanup" => Ok(JobKind::ReferenceCleanup),
            "activity" | "activity-pruning" => Ok(JobKind::ActivityPruning),
            other => Err(MaintenanceError::Config(format!("Unknown job '{}'", other))),
        }
    }
}

/// Instantiate the requested jobs against `store`
pub fn build_jobs(
    config: &Config,
    store: Arc<dyn DocumentStore>,
    kinds: &[JobKind],
) -> Vec<Arc<dyn MaintenanceJob>> {
    kinds
        .iter()
        .map(|kind| -> Arc<dyn MaintenanceJob> {
            match kind {
                JobKind::Aggregation => Arc::new(AggregationJob::new(store.clone(), config)),
                JobKind::ReferenceCleanup => {
                    Arc::new(ReferenceCleanupJob::new(store.clone(), config))
                }
                JobKind::ActivityPruning => {
                    Arc::new(ActivityPruningJob::new(store.clone(), config))
                }
            }
        })
        .collect()
}

/// Exponential backoff once a job has failed three times in a row (capped at 2^5 seconds)
pub fn backoff_for(consecutive_failures: u32) -> Option<Duration> {
    (consecutive_failures >= 3).then(|| Duration::from_secs(2u64.pow(consecutive_failures.min(5))))
}

/// Run a single job on a fixed interval until shutdown
///
/// - The first tick fires immediately
/// - Errors are logged and the loop continues on the next tick
/// - `limiter` bounds how many jobs execute at the same time
pub async fn run_job_loop(
    job: Arc<dyn MaintenanceJob>,
    every: Duration,
    limiter: Arc<Semaphore>,
    shutdown_signal: broadcast::Receiver<()>,
) {
    let mut interval_timer = interval(every);
    let mut shutdown = shutdown_signal;
    let mut consecutive_failures = 0u32;

    info!(
        job_name = job.name(),
        interval_sec = every.as_secs(),
        "Starting job loop"
    );

    loop {
        if let Some(backoff) = backoff_for(consecutive_failures) {
            info!(
                job_name = job.name(),
                backoff_secs = backoff.as_secs(),
                "Applying exponential backoff due to consecutive failures"
            );
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.recv() => break,
            }
        }

        tokio::select! {
            _ = interval_timer.tick() => {}
            _ = shutdown.recv() => {
                info!(job_name = job.name(), "Received shutdown signal, stopping job loop");
                break;
            }
        }

        let permit = tokio::select! {
            permit = limiter.acquire() => permit,
            _ = shutdown.recv() => {
                info!(job_name = job.name(), "Received shutdown signal while waiting for a slot");
                break;
            }
        };
        let Ok(_permit) = permit else {
            warn!(job_name = job.name(), "Job limiter closed, stopping job loop");
            break;
        };

        match job.execute().await {
            Ok(_) => {
                if consecutive_failures > 0 {
                    info!(
                        job_name = job.name(),
                        recovered_after = consecutive_failures,
                        "Job recovered after failures"
                    );
                    consecutive_failures = 0;
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                error!(
                    job_name = job.name(),
                    error = %e,
                    retryable = e.is_retryable(),
                    consecutive_failures,
                    "Job execution failed, will retry on next interval"
                );
            }
        }
        set_consecutive_failures(job.name(), consecutive_failures);
    }

    info!(job_name = job.name(), "Job loop stopped");
}

/// Run every job in its own loop until shutdown
pub async fn run_jobs(
    jobs: Vec<Arc<dyn MaintenanceJob>>,
    every: Duration,
    max_concurrent: usize,
    shutdown_signal: &broadcast::Sender<()>,
) {
    let limiter = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut handles = Vec::with_capacity(jobs.len());

    for job in jobs {
        let shutdown_rx = shutdown_signal.subscribe();
        let limiter = limiter.clone();
        handles.push(tokio::spawn(run_job_loop(job, every, limiter, shutdown_rx)));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Job task panicked");
        }
    }
}

/// Execute each job once, in order. Failures do not stop the remaining jobs.
pub async fn run_once(
    jobs: &[Arc<dyn MaintenanceJob>],
) -> Vec<(&'static str, MaintenanceResult<JobReport>)> {
    let mut results = Vec::with_capacity(jobs.len());
    for job in jobs {
        results.push((job.name(), job.execute().await));
    }
    results
}
