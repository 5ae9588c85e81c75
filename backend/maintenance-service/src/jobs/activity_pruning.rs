//! Activity Pruning Job
//!
//! Drops per-category daily activity older than the retention window.

use super::{JobContext, JobReport, MaintenanceJob, RunGuard};
use crate::change_set::{build_activity_pruning, cutoff_date};
use crate::committer::BatchCommitter;
use crate::config::Config;
use crate::error::MaintenanceResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use document_store::DocumentStore;
use std::sync::Arc;
use tracing::debug;

const COMMIT_STAGE: &str = "commit-activity-pruning";

pub struct ActivityPruningJob {
    store: Arc<dyn DocumentStore>,
    committer: BatchCommitter,
    users: String,
    activity_field: String,
    retention_days: i64,
    clock: fn() -> DateTime<Utc>,
    guard: RunGuard,
}

impl ActivityPruningJob {
    pub fn new(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        Self {
            committer: BatchCommitter::new(store.clone(), config.schedule.batch_limit),
            store,
            users: config.collections.users.clone(),
            activity_field: config.collections.daily_activity_field.clone(),
            retention_days: config.retention.retention_days,
            clock: Utc::now,
            guard: RunGuard::new(),
        }
    }

    /// Replace the wall clock used to compute the cutoff.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl MaintenanceJob for ActivityPruningJob {
    fn name(&self) -> &'static str {
        "activity_pruning"
    }

    fn run_guard(&self) -> &RunGuard {
        &self.guard
    }

    async fn run(&self, ctx: &JobContext) -> MaintenanceResult<JobReport> {
        let mut report = JobReport::new(self.name(), ctx);
        let cutoff = cutoff_date((self.clock)(), self.retention_days);

        let users = self.store.scan(&self.users, &[]).await?;
        report.documents_scanned += users.len();

        let outcome = build_activity_pruning(&self.users, &self.activity_field, cutoff, &users);
        report.malformed += outcome.malformed;
        report.intents_built += outcome.change_set.len();
        debug!(
            correlation_id = %ctx.correlation_id,
            cutoff = %cutoff,
            users = users.len(),
            expired_entries = outcome.change_set.field_change_count(),
            "Activity pruning built"
        );

        let commit = self.committer.commit(COMMIT_STAGE, outcome.change_set).await;
        report.absorb_commit(COMMIT_STAGE, commit)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use document_store::MemoryDocumentStore;
    use serde_json::json;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_prunes_before_cutoff_only() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .insert(
                "Users",
                "u1",
                json!({"dailyActivityByTheme": {
                    "Histoire": {"2024-03-09": 3, "2024-03-10": 1},
                    "Sciences": {"2024-01-01": 2}
                }}),
            )
            .await;
        let job = ActivityPruningJob::new(store.clone(), &Config::default()).with_clock(fixed_now);

        let report = job.run(&JobContext::new()).await.unwrap();

        assert_eq!(report.commit.groups_committed, 1);
        assert_eq!(
            store.get("Users", "u1").await.unwrap(),
            json!({"dailyActivityByTheme": {
                "Histoire": {"2024-03-10": 1},
                "Sciences": {}
            }})
        );
    }
}
