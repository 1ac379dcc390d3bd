//! Job lifecycle state.

mod in_memory;

pub use in_memory::InMemoryJobStateStore;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use jobstream_core::{CoreError, JobId, JobRecord, JobStatus, JobToken, Metrics, NewJob, Progress};

/// Job state store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record for job {job_id}: {reason}")]
    Corrupt { job_id: JobId, reason: String },
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        CoreError::storage(err.to_string())
    }
}

/// Outcome of a guarded status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Applied { previous: JobStatus },
    /// The transition is not allowed from `current`; nothing was written.
    Rejected { current: JobStatus },
    /// No live record (never created, or expired).
    Missing,
}

impl StatusChange {
    pub fn is_applied(&self) -> bool {
        matches!(self, StatusChange::Applied { .. })
    }
}

/// Durable job records plus the cancellation flag and side data.
///
/// Writes refresh the record's retention window; expired records read as
/// missing and are never recreated by the merge operations.
#[async_trait]
pub trait JobStateStore: Send + Sync {
    /// Persist a new `queued` record; returns its id and access token.
    async fn create_job(&self, new: NewJob) -> Result<(JobId, JobToken), StoreError>;

    async fn get_job_state(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Set the cancellation flag and move a live job to `cancelled`.
    ///
    /// Idempotent. Returns false only for unknown ids. A job that already
    /// finished keeps its terminal status.
    async fn cancel_job(&self, job_id: JobId) -> Result<bool, StoreError>;

    async fn is_cancelled(&self, job_id: JobId) -> Result<bool, StoreError>;

    /// Write `status` if the lifecycle allows it, optionally replacing the total.
    async fn apply_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        total: Option<u64>,
    ) -> Result<StatusChange, StoreError>;

    /// Merge the progress projection. Returns false when the record is gone.
    async fn apply_progress(
        &self,
        job_id: JobId,
        progress: Progress,
        metrics: Metrics,
        current: JsonValue,
    ) -> Result<bool, StoreError>;

    async fn set_job_data(&self, job_id: JobId, key: &str, value: JsonValue) -> Result<(), StoreError>;

    async fn get_job_data(&self, job_id: JobId, key: &str) -> Result<Option<JsonValue>, StoreError>;

    /// Cheap reachability probe for health checks.
    async fn ping(&self) -> Result<(), StoreError>;
}
