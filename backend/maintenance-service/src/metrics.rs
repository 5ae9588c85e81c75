//! Job Metrics for Prometheus
//!
//! Tracks maintenance job runs, written mutations, write groups and skipped records.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_histogram_vec_with_registry, CounterVec, Encoder, GaugeVec, HistogramVec, Registry,
    TextEncoder,
};

lazy_static! {
    /// Registry for all maintenance metrics
    pub static ref REGISTRY: Registry = Registry::new();

    /// Total job executions (labels: job_name, status=success|failed)
    pub static ref JOB_RUNS_TOTAL: CounterVec = register_counter_vec_with_registry!(
        "maintenance_job_runs_total",
        "Total number of maintenance job executions",
        &["job_name", "status"],
        REGISTRY
    )
    .expect("Failed to register metric");

    /// Mutation intents applied (labels: job_name)
    pub static ref MUTATIONS_APPLIED_TOTAL: CounterVec = register_counter_vec_with_registry!(
        "maintenance_mutations_applied_total",
        "Mutation intents applied through committed write groups",
        &["job_name"],
        REGISTRY
    )
    .expect("Failed to register metric");

    /// Write groups (labels: job_name, outcome=committed|failed)
    pub static ref COMMIT_GROUPS_TOTAL: CounterVec = register_counter_vec_with_registry!(
        "maintenance_commit_groups_total",
        "Write groups issued to the document store",
        &["job_name", "outcome"],
        REGISTRY
    )
    .expect("Failed to register metric");

    /// Records skipped for failing shape validation (labels: job_name)
    pub static ref MALFORMED_RECORDS_TOTAL: CounterVec = register_counter_vec_with_registry!(
        "maintenance_malformed_records_total",
        "Scanned records skipped because they failed shape validation",
        &["job_name"],
        REGISTRY
    )
    .expect("Failed to register metric");

    /// Job execution duration in seconds (labels: job_name)
    pub static ref JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec_with_registry!(
        "maintenance_job_duration_seconds",
        "Time spent executing maintenance jobs",
        &["job_name"],
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0],
        REGISTRY
    )
    .expect("Failed to register metric");

    /// Last successful job run timestamp (labels: job_name)
    pub static ref JOB_LAST_SUCCESS_TIMESTAMP: GaugeVec = register_gauge_vec_with_registry!(
        "maintenance_job_last_success_timestamp",
        "Unix timestamp of the last successful job execution",
        &["job_name"],
        REGISTRY
    )
    .expect("Failed to register metric");

    /// Consecutive job failures (labels: job_name)
    pub static ref JOB_CONSECUTIVE_FAILURES: GaugeVec = register_gauge_vec_with_registry!(
        "maintenance_job_consecutive_failures",
        "Number of consecutive failures for a job",
        &["job_name"],
        REGISTRY
    )
    .expect("Failed to register metric");

    /// Documents scanned in the last run (labels: job_name)
    pub static ref JOB_DOCUMENTS_SCANNED: GaugeVec = register_gauge_vec_with_registry!(
        "maintenance_job_documents_scanned",
        "Number of documents scanned in the last job execution",
        &["job_name"],
        REGISTRY
    )
    .expect("Failed to register metric");
}

/// Helper functions for job metrics
pub mod helpers {
    use super::*;
    use crate::committer::CommitReport;
    use crate::jobs::JobReport;

    /// Record a successful job run
    pub fn record_job_success(job_name: &str, duration_ms: u64, report: &JobReport) {
        JOB_RUNS_TOTAL
            .with_label_values(&[job_name, "success"])
            .inc();

        JOB_DURATION_SECONDS
            .with_label_values(&[job_name])
            .observe(duration_ms as f64 / 1000.0);

        JOB_LAST_SUCCESS_TIMESTAMP
            .with_label_values(&[job_name])
            .set(chrono::Utc::now().timestamp() as f64);

        record_report(job_name, report);
    }

    /// Record a failed job run; `commit` is present when write groups were rejected
    pub fn record_job_failure(job_name: &str, duration_ms: u64, commit: Option<&CommitReport>) {
        JOB_RUNS_TOTAL
            .with_label_values(&[job_name, "failed"])
            .inc();

        JOB_DURATION_SECONDS
            .with_label_values(&[job_name])
            .observe(duration_ms as f64 / 1000.0);

        if let Some(commit) = commit {
            record_commit(job_name, commit);
        }
    }

    /// Failures in a row as seen by the scheduler loop
    pub fn set_consecutive_failures(job_name: &str, consecutive_failures: u32) {
        JOB_CONSECUTIVE_FAILURES
            .with_label_values(&[job_name])
            .set(f64::from(consecutive_failures));
    }

    fn record_report(job_name: &str, report: &JobReport) {
        JOB_DOCUMENTS_SCANNED
            .with_label_values(&[job_name])
            .set(report.documents_scanned as f64);

        MALFORMED_RECORDS_TOTAL
            .with_label_values(&[job_name])
            .inc_by(report.malformed as f64);

        record_commit(job_name, &report.commit);
    }

    fn record_commit(job_name: &str, commit: &CommitReport) {
        MUTATIONS_APPLIED_TOTAL
            .with_label_values(&[job_name])
            .inc_by(commit.intents_applied() as f64);

        COMMIT_GROUPS_TOTAL
            .with_label_values(&[job_name, "committed"])
            .inc_by(commit.groups_committed as f64);

        COMMIT_GROUPS_TOTAL
            .with_label_values(&[job_name, "failed"])
            .inc_by(commit.groups_failed as f64);
    }
}

/// Render all maintenance metrics in the Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::helpers::*;
    use super::*;
    use crate::committer::CommitReport;
    use crate::jobs::JobReport;

    #[test]
    fn test_success_updates_counters() {
        let report = JobReport {
            documents_scanned: 12,
            malformed: 1,
            commit: CommitReport {
                intents_submitted: 4,
                groups_committed: 1,
                ..Default::default()
            },
            ..Default::default()
        };

        record_job_success("metrics-test-job", 20, &report);

        assert_eq!(
            JOB_DOCUMENTS_SCANNED
                .with_label_values(&["metrics-test-job"])
                .get(),
            12.0
        );
        assert!(
            MUTATIONS_APPLIED_TOTAL
                .with_label_values(&["metrics-test-job"])
                .get()
                >= 4.0
        );
        assert!(gather_metrics().contains("maintenance_job_runs_total"));
    }

    #[test]
    fn test_failure_counts_committed_and_rejected_groups() {
        let commit = CommitReport {
            intents_submitted: 30,
            groups_committed: 2,
            groups_failed: 1,
            failures: vec![crate::committer::GroupFailure {
                group_index: 1,
                intents: 10,
                error: "rejected".to_string(),
            }],
        };

        record_job_failure("metrics-failed-job", 15, Some(&commit));
        record_job_failure("metrics-failed-job", 5, None);

        assert_eq!(
            COMMIT_GROUPS_TOTAL
                .with_label_values(&["metrics-failed-job", "failed"])
                .get(),
            1.0
        );
        assert_eq!(
            COMMIT_GROUPS_TOTAL
                .with_label_values(&["metrics-failed-job", "committed"])
                .get(),
            2.0
        );
        assert_eq!(
            MUTATIONS_APPLIED_TOTAL
                .with_label_values(&["metrics-failed-job"])
                .get(),
            20.0
        );
        assert_eq!(
            JOB_RUNS_TOTAL
                .with_label_values(&["metrics-failed-job", "failed"])
                .get(),
            2.0
        );
    }
}
