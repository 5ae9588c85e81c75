//! Error types for the maintenance jobs.

use crate::committer::CommitReport;
use document_store::StoreError;
use thiserror::Error;

/// Result type alias for maintenance operations.
pub type MaintenanceResult<T> = Result<T, MaintenanceError>;

#[derive(Error, Debug)]
pub enum MaintenanceError {
    /// Scan or lookup against the document store failed; nothing was written
    #[error("Document store error: {0}")]
    Store(#[from] StoreError),

    /// Some write groups were rejected. Earlier groups stay applied.
    #[error("{job}: {failed_groups} of {total_groups} write groups failed during {stage}")]
    PartialCommit {
        job: String,
        stage: String,
        failed_groups: usize,
        total_groups: usize,
        /// Every commit of the run up to and including the failing stage
        commit: Box<CommitReport>,
    },

    /// Another run of the same job is still in progress in this process
    #[error("Job already running: {0}")]
    AlreadyRunning(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MaintenanceError {
    /// Whether the next scheduled run can be expected to converge on its own
    pub fn is_retryable(&self) -> bool {
        match self {
            MaintenanceError::Store(e) => e.is_transient(),
            MaintenanceError::PartialCommit { .. } | MaintenanceError::AlreadyRunning(_) => true,
            MaintenanceError::Config(_) => false,
        }
    }
}
