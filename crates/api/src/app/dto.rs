use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use jobstream_core::{JobId, JobRecord, JobStatus, Metrics, Progress, TenantId};

#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub job_id: JobId,
    /// Shown once; required to stream events and download results.
    pub job_token: String,
    pub status: JobStatus,
}

/// Public view of a job record: everything except its secrets.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub job_type: String,
    pub status: JobStatus,
    pub progress: Progress,
    pub metrics: Metrics,
    pub current: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<JobRecord> for JobView {
    fn from(rec: JobRecord) -> Self {
        Self {
            job_id: rec.job_id,
            tenant_id: rec.tenant_id,
            job_type: rec.job_type,
            status: rec.status,
            progress: rec.progress,
            metrics: rec.metrics,
            current: rec.current,
            created_at: rec.created_at,
            updated_at: rec.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    /// Status after the request; a finished job keeps its terminal status.
    pub status: JobStatus,
}
