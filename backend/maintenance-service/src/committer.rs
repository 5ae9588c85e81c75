//! Batch Committer
//!
//! Drains a [`ChangeSet`] into write groups no larger than the store's
//! per-commit limit and commits them one after another, in the order the
//! intents were produced. A rejected group is recorded and skipped; groups
//! committed before it stay applied. Re-running the job converges because
//! the builders are idempotent.

use crate::change_set::{ChangeSet, Mutation};
use document_store::{DocumentStore, StoreResult, WriteBatch, WriteOp};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupFailure {
    /// Zero-based position of the group in commit order
    pub group_index: usize,
    pub intents: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub intents_submitted: usize,
    pub groups_committed: usize,
    pub groups_failed: usize,
    pub failures: Vec<GroupFailure>,
}

impl CommitReport {
    pub fn is_clean(&self) -> bool {
        self.groups_failed == 0
    }

    pub fn total_groups(&self) -> usize {
        self.groups_committed + self.groups_failed
    }

    /// Intents that were part of a successfully committed group.
    pub fn intents_applied(&self) -> usize {
        let failed: usize = self.failures.iter().map(|f| f.intents).sum();
        self.intents_submitted - failed
    }

    /// Fold another stage's report into this one.
    pub fn absorb(&mut self, other: CommitReport) {
        self.intents_submitted += other.intents_submitted;
        self.groups_committed += other.groups_committed;
        self.groups_failed += other.groups_failed;
        self.failures.extend(other.failures);
    }
}

/// Group sizes for `intents` mutations under `limit`, in commit order.
pub fn plan_groups(intents: usize, limit: usize) -> Vec<usize> {
    let limit = limit.max(1);
    let mut sizes = Vec::with_capacity(intents.div_ceil(limit));
    let mut remaining = intents;
    while remaining > 0 {
        let size = remaining.min(limit);
        sizes.push(size);
        remaining -= size;
    }
    sizes
}

pub struct BatchCommitter {
    store: Arc<dyn DocumentStore>,
    group_limit: usize,
}

impl BatchCommitter {
    /// `group_limit` is capped by what the store accepts per commit.
    pub fn new(store: Arc<dyn DocumentStore>, group_limit: usize) -> Self {
        let group_limit = group_limit.min(store.max_batch_ops()).max(1);
        Self { store, group_limit }
    }

    pub fn group_limit(&self) -> usize {
        self.group_limit
    }

    /// Commit `change_set` group by group. Never returns early on a failed group.
    pub async fn commit(&self, stage: &str, change_set: ChangeSet) -> CommitReport {
        let mut report = CommitReport {
            intents_submitted: change_set.len(),
            ..Default::default()
        };
        if change_set.is_empty() {
            debug!(stage, "Nothing to commit");
            return report;
        }

        let mut mutations = change_set.into_mutations().into_iter().peekable();
        let mut group_index = 0;

        while mutations.peek().is_some() {
            let group: Vec<Mutation> = mutations.by_ref().take(self.group_limit).collect();
            let intents = group.len();

            match self.commit_group(group).await {
                Ok(()) => {
                    report.groups_committed += 1;
                    debug!(stage, group_index, intents, "Write group committed");
                }
                Err(e) => {
                    warn!(
                        stage,
                        group_index,
                        intents,
                        error = %e,
                        "Write group failed, earlier groups stay applied"
                    );
                    report.groups_failed += 1;
                    report.failures.push(GroupFailure {
                        group_index,
                        intents,
                        error: e.to_string(),
                    });
                }
            }
            group_index += 1;
        }

        report
    }

    async fn commit_group(&self, group: Vec<Mutation>) -> StoreResult<()> {
        let mut batch: WriteBatch = self.store.new_batch();
        for mutation in group {
            batch.push(WriteOp::from(mutation))?;
        }
        self.store.commit(batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_set::DocumentRef;
    use document_store::MemoryDocumentStore;

    fn log_deletions(count: usize) -> ChangeSet {
        let mut cs = ChangeSet::new();
        for i in 0..count {
            cs.delete_document(DocumentRef::new("AnswerLogs", format!("log-{i:05}")));
        }
        cs
    }

    #[test]
    fn test_plan_groups() {
        assert_eq!(plan_groups(1200, 500), vec![500, 500, 200]);
        assert_eq!(plan_groups(500, 500), vec![500]);
        assert_eq!(plan_groups(0, 500), Vec::<usize>::new());
        assert_eq!(plan_groups(3, 0), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn test_group_limit_is_capped_by_store() {
        let store = Arc::new(MemoryDocumentStore::with_max_batch_ops(100));
        let committer = BatchCommitter::new(store, 500);
        assert_eq!(committer.group_limit(), 100);
    }

    #[tokio::test]
    async fn test_partitions_in_original_order() {
        let store = Arc::new(MemoryDocumentStore::new());
        for i in 0..1200 {
            store
                .insert("AnswerLogs", &format!("log-{i:05}"), serde_json::json!({}))
                .await;
        }
        let committer = BatchCommitter::new(store.clone(), 500);

        let report = committer.commit("delete-logs", log_deletions(1200)).await;

        assert_eq!(report.intents_submitted, 1200);
        assert_eq!(report.groups_committed, 3);
        assert_eq!(report.groups_failed, 0);
        assert_eq!(store.committed_batch_sizes().await, vec![500, 500, 200]);
        assert_eq!(store.count("AnswerLogs").await, 0);
    }

    #[tokio::test]
    async fn test_failed_group_does_not_stop_later_groups() {
        let store = Arc::new(MemoryDocumentStore::new());
        for i in 0..30 {
            store
                .insert("AnswerLogs", &format!("log-{i:05}"), serde_json::json!({}))
                .await;
        }
        store.fail_commit(2).await;
        let committer = BatchCommitter::new(store.clone(), 10);

        let report = committer.commit("delete-logs", log_deletions(30)).await;

        assert_eq!(report.groups_committed, 2);
        assert_eq!(report.groups_failed, 1);
        assert_eq!(report.failures[0].group_index, 1);
        assert_eq!(report.intents_applied(), 20);
        assert!(!report.is_clean());
        // the second group (log-00010..log-00019) is still there
        assert_eq!(store.count("AnswerLogs").await, 10);
        assert!(store.get("AnswerLogs", "log-00015").await.is_some());
    }

    #[tokio::test]
    async fn test_empty_change_set_issues_no_commit() {
        let store = Arc::new(MemoryDocumentStore::new());
        let committer = BatchCommitter::new(store.clone(), 500);

        let report = committer.commit("noop", ChangeSet::new()).await;

        assert_eq!(report, CommitReport::default());
        assert_eq!(store.commit_attempts().await, 0);
    }
}
