//! Maintenance Service
//!
//! Scheduled jobs that keep quiz progress data consistent:
//! - fold answer logs into per-question counters and difficulty
//! - remove answered-question entries for deleted questions
//! - prune daily activity outside the retention window
//!
//! Jobs read snapshots through [`document_store::DocumentStore`], build a
//! [`change_set::ChangeSet`] with pure functions and hand it to the
//! [`committer::BatchCommitter`].

pub mod change_set;
pub mod committer;
pub mod config;
pub mod error;
pub mod jobs;
pub mod metrics;

pub use committer::{BatchCommitter, CommitReport};
pub use config::{Config, StoreBackend};
pub use error::{MaintenanceError, MaintenanceResult};
pub use jobs::{
    build_jobs, run_job_loop, run_jobs, run_once, ActivityPruningJob, AggregationJob, JobKind,
    JobReport, MaintenanceJob, ReferenceCleanupJob,
};
