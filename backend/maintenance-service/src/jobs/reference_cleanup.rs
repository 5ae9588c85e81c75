//! Reference Cleanup Job
//!
//! Removes answered-question entries that point at questions which no longer
//! exist.

use super::{JobContext, JobReport, MaintenanceJob, RunGuard};
use crate::change_set::build_reference_cleanup;
use crate::committer::BatchCommitter;
use crate::config::Config;
use crate::error::MaintenanceResult;
use async_trait::async_trait;
use document_store::DocumentStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

const COMMIT_STAGE: &str = "commit-reference-cleanup";

pub struct ReferenceCleanupJob {
    store: Arc<dyn DocumentStore>,
    committer: BatchCommitter,
    questions: String,
    users: String,
    answered_field: String,
    guard: RunGuard,
}

impl ReferenceCleanupJob {
    pub fn new(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        Self {
            committer: BatchCommitter::new(store.clone(), config.schedule.batch_limit),
            store,
            questions: config.collections.questions.clone(),
            users: config.collections.users.clone(),
            answered_field: config.collections.answered_questions_field.clone(),
            guard: RunGuard::new(),
        }
    }
}

#[async_trait]
impl MaintenanceJob for ReferenceCleanupJob {
    fn name(&self) -> &'static str {
        "reference_cleanup"
    }

    fn run_guard(&self) -> &RunGuard {
        &self.guard
    }

    async fn run(&self, ctx: &JobContext) -> MaintenanceResult<JobReport> {
        let mut report = JobReport::new(self.name(), ctx);

        let questions = self.store.scan(&self.questions, &[]).await?;
        let canonical: HashSet<String> = questions.into_iter().map(|q| q.id).collect();
        report.documents_scanned += canonical.len();

        let users = self.store.scan(&self.users, &[]).await?;
        report.documents_scanned += users.len();

        let outcome = build_reference_cleanup(&self.users, &self.answered_field, &canonical, &users);
        report.malformed += outcome.malformed;
        report.intents_built += outcome.change_set.len();
        debug!(
            correlation_id = %ctx.correlation_id,
            canonical_questions = canonical.len(),
            users = users.len(),
            stale_entries = outcome.change_set.field_change_count(),
            "Reference cleanup built"
        );

        let commit = self.committer.commit(COMMIT_STAGE, outcome.change_set).await;
        report.absorb_commit(COMMIT_STAGE, commit)?;
        Ok(report)
    }
}
