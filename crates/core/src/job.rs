//! Job record and its condensed progress projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::{JobId, TenantId};
use crate::status::JobStatus;

/// Compute `floor(done / total * 100)`; a zero total yields 0.
pub fn percent(done: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    let p = (u128::from(done) * 100) / u128::from(total);
    u32::try_from(p).unwrap_or(u32::MAX)
}

/// Per-job secret required to stream or download a job's results.
///
/// `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobToken(String);

impl JobToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for JobToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("JobToken(***)")
    }
}

/// Items processed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub done: u64,
    pub total: u64,
    pub percent: u32,
}

impl Progress {
    pub fn new(done: u64, total: u64) -> Self {
        Self {
            done,
            total,
            percent: percent(done, total),
        }
    }
}

/// Per-item outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub success: u64,
    pub failed: u64,
    pub retried: u64,
    pub skipped: u64,
}

/// Input to `create_job`.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub tenant_id: TenantId,
    pub job_type: String,
    /// Opaque to the core; never reinterpreted.
    pub params: JsonValue,
    pub session_qualifier: Option<String>,
}

impl NewJob {
    pub fn new(tenant_id: TenantId, job_type: impl Into<String>, params: JsonValue) -> Self {
        Self {
            tenant_id,
            job_type: job_type.into(),
            params,
            session_qualifier: None,
        }
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session_qualifier = Some(session.into());
        self
    }
}

/// Durable job metadata plus the condensed progress projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub job_type: String,
    pub status: JobStatus,
    pub params: JsonValue,
    pub progress: Progress,
    pub metrics: Metrics,
    /// Small opaque blob describing the in-flight item.
    pub current: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub job_token: JobToken,
    pub session_qualifier: Option<String>,
}

impl JobRecord {
    /// Build the initial `queued` record.
    pub fn queued(job_id: JobId, token: JobToken, new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            tenant_id: new.tenant_id,
            job_type: new.job_type,
            status: JobStatus::Queued,
            params: new.params,
            progress: Progress::default(),
            metrics: Metrics::default(),
            current: JsonValue::Object(Default::default()),
            created_at: now,
            updated_at: now,
            job_token: token,
            session_qualifier: new.session_qualifier,
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            status: self.status,
            done: self.progress.done,
            total: self.progress.total,
            percent: self.progress.percent,
        }
    }
}

/// Point-in-time view sent to a viewer on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub done: u64,
    pub total: u64,
    pub percent: u32,
}
