//! Answer Aggregation Job
//!
//! Folds pending answer logs into the per-question counters, recomputes
//! difficulty from the lifetime counters and finally deletes the consumed
//! logs.
//!
//! ```text
//! ScanLogs -> BuildEntityStats -> ResolveCanonicalEntities -> CommitCounterUpdates
//!          -> RecomputeDifficulty -> CommitDifficultyUpdates -> DeleteConsumedLogs -> Done
//! ```
//!
//! Logs are only deleted once both the counter and the difficulty commits
//! went through in full. Any rejected write group stops the run before
//! `DeleteConsumedLogs`, so the logs stay for the next run.

use super::{JobContext, JobReport, MaintenanceJob, RunGuard};
use crate::change_set::{
    build_counter_updates, build_difficulty_updates, BuildOutcome, ChangeSet, DifficultyPolicy,
    DocumentRef, StatsAccumulator,
};
use crate::committer::BatchCommitter;
use crate::config::Config;
use crate::error::MaintenanceResult;
use async_trait::async_trait;
use document_store::{Document, DocumentStore};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationStage {
    ScanLogs,
    BuildEntityStats,
    ResolveCanonicalEntities,
    CommitCounterUpdates,
    RecomputeDifficulty,
    CommitDifficultyUpdates,
    DeleteConsumedLogs,
    Done,
}

impl AggregationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationStage::ScanLogs => "scan-logs",
            AggregationStage::BuildEntityStats => "build-entity-stats",
            AggregationStage::ResolveCanonicalEntities => "resolve-canonical-entities",
            AggregationStage::CommitCounterUpdates => "commit-counter-updates",
            AggregationStage::RecomputeDifficulty => "recompute-difficulty",
            AggregationStage::CommitDifficultyUpdates => "commit-difficulty-updates",
            AggregationStage::DeleteConsumedLogs => "delete-consumed-logs",
            AggregationStage::Done => "done",
        }
    }
}

impl fmt::Display for AggregationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage plus the data handed from one stage to the next
enum State {
    ScanLogs,
    BuildEntityStats { logs: Vec<Document> },
    ResolveCanonicalEntities { stats: StatsAccumulator },
    CommitCounterUpdates { stats: StatsAccumulator, outcome: BuildOutcome },
    RecomputeDifficulty { stats: StatsAccumulator },
    CommitDifficultyUpdates { stats: StatsAccumulator, outcome: BuildOutcome },
    DeleteConsumedLogs { stats: StatsAccumulator },
    Done,
}

impl State {
    fn stage(&self) -> AggregationStage {
        match self {
            State::ScanLogs => AggregationStage::ScanLogs,
            State::BuildEntityStats { .. } => AggregationStage::BuildEntityStats,
            State::ResolveCanonicalEntities { .. } => AggregationStage::ResolveCanonicalEntities,
            State::CommitCounterUpdates { .. } => AggregationStage::CommitCounterUpdates,
            State::RecomputeDifficulty { .. } => AggregationStage::RecomputeDifficulty,
            State::CommitDifficultyUpdates { .. } => AggregationStage::CommitDifficultyUpdates,
            State::DeleteConsumedLogs { .. } => AggregationStage::DeleteConsumedLogs,
            State::Done => AggregationStage::Done,
        }
    }
}

pub struct AggregationJob {
    store: Arc<dyn DocumentStore>,
    committer: BatchCommitter,
    questions: String,
    answer_logs: String,
    policy: DifficultyPolicy,
    guard: RunGuard,
}

impl AggregationJob {
    pub fn new(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        Self {
            committer: BatchCommitter::new(store.clone(), config.schedule.batch_limit),
            store,
            questions: config.collections.questions.clone(),
            answer_logs: config.collections.answer_logs.clone(),
            policy: DifficultyPolicy {
                threshold: config.difficulty.threshold,
                default_difficulty: config.difficulty.default_difficulty,
            },
            guard: RunGuard::new(),
        }
    }

    async fn step(
        &self,
        state: State,
        ctx: &JobContext,
        report: &mut JobReport,
    ) -> MaintenanceResult<State> {
        let next = match state {
            State::ScanLogs => {
                let logs = self.store.scan(&self.answer_logs, &[]).await?;
                report.documents_scanned += logs.len();
                if logs.is_empty() {
                    info!(correlation_id = %ctx.correlation_id, "No pending answer logs");
                    State::Done
                } else {
                    State::BuildEntityStats { logs }
                }
            }
            State::BuildEntityStats { logs } => {
                let stats = StatsAccumulator::from_logs(&logs);
                report.malformed += stats.malformed();
                debug!(
                    correlation_id = %ctx.correlation_id,
                    logs = logs.len(),
                    questions = stats.len(),
                    malformed = stats.malformed(),
                    "Answer statistics built"
                );
                State::ResolveCanonicalEntities { stats }
            }
            State::ResolveCanonicalEntities { stats } => {
                let lookups = if stats.is_empty() {
                    Vec::new()
                } else {
                    self.store
                        .get_many(&self.questions, &stats.question_ids())
                        .await?
                };
                let outcome = build_counter_updates(&self.questions, &stats, &lookups);
                report.skipped_references += outcome.skipped_references;
                State::CommitCounterUpdates { stats, outcome }
            }
            State::CommitCounterUpdates { stats, outcome } => {
                self.commit_stage(AggregationStage::CommitCounterUpdates, outcome, report)
                    .await?;
                State::RecomputeDifficulty { stats }
            }
            State::RecomputeDifficulty { stats } => {
                let questions = self.store.scan(&self.questions, &[]).await?;
                report.documents_scanned += questions.len();
                let outcome = build_difficulty_updates(&self.questions, &questions, &self.policy);
                report.malformed += outcome.malformed;
                State::CommitDifficultyUpdates { stats, outcome }
            }
            State::CommitDifficultyUpdates { stats, outcome } => {
                self.commit_stage(AggregationStage::CommitDifficultyUpdates, outcome, report)
                    .await?;
                State::DeleteConsumedLogs { stats }
            }
            State::DeleteConsumedLogs { stats } => {
                let mut deletions = ChangeSet::new();
                for log_id in stats.consumed_log_ids() {
                    deletions.delete_document(DocumentRef::new(&self.answer_logs, log_id.clone()));
                }
                self.commit_stage(
                    AggregationStage::DeleteConsumedLogs,
                    BuildOutcome {
                        change_set: deletions,
                        ..Default::default()
                    },
                    report,
                )
                .await?;
                State::Done
            }
            State::Done => State::Done,
        };
        Ok(next)
    }

    async fn commit_stage(
        &self,
        stage: AggregationStage,
        outcome: BuildOutcome,
        report: &mut JobReport,
    ) -> MaintenanceResult<()> {
        report.intents_built += outcome.change_set.len();
        let commit = self
            .committer
            .commit(stage.as_str(), outcome.change_set)
            .await;
        report.absorb_commit(stage.as_str(), commit)
    }
}

#[async_trait]
impl MaintenanceJob for AggregationJob {
    fn name(&self) -> &'static str {
        "answer_aggregation"
    }

    fn run_guard(&self) -> &RunGuard {
        &self.guard
    }

    async fn run(&self, ctx: &JobContext) -> MaintenanceResult<JobReport> {
        let mut report = JobReport::new(self.name(), ctx);
        let mut state = State::ScanLogs;

        while state.stage() != AggregationStage::Done {
            let stage = state.stage();
            debug!(correlation_id = %ctx.correlation_id, stage = %stage, "Entering stage");
            state = self.step(state, ctx, &mut report).await?;
        }

        Ok(report)
    }
}
