//! Handler-facing side of a job: status, progress and log emission plus the
//! cancellation probe.
//!
//! `emit_status` and `emit_progress` append to the event log first and then
//! merge into the state projection. The two writes are not transactional; the
//! log is authoritative and the projection may briefly lag it.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use jobstream_core::{CoreError, JobId, JobStatus, Metrics, Progress};
use jobstream_events::{
    EventKind, EventOffset, LogLevel, LogPayload, ProgressPayload, StatusPayload,
};

use crate::event_log::{EventLog, EventLogError};
use crate::state::{JobStateStore, StatusChange, StoreError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum EmitError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Log(#[from] EventLogError),
    #[error("failed to encode event payload: {0}")]
    Encode(String),
}

impl From<EmitError> for CoreError {
    fn from(err: EmitError) -> Self {
        match err {
            EmitError::Store(e) => e.into(),
            EmitError::Log(e) => e.into(),
            EmitError::Encode(msg) => CoreError::fatal(msg),
        }
    }
}

/// Progress counters reported by a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressReport {
    pub done: u64,
    pub total: u64,
    pub metrics: Metrics,
    /// Small description of the in-flight item.
    pub current: JsonValue,
}

impl ProgressReport {
    pub fn new(done: u64, total: u64) -> Self {
        Self {
            done,
            total,
            ..Default::default()
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_current(mut self, current: JsonValue) -> Self {
        self.current = current;
        self
    }
}

/// Emission handle bound to one job.
#[derive(Clone)]
pub struct JobEmitter {
    job_id: JobId,
    state: Arc<dyn JobStateStore>,
    log: Arc<dyn EventLog>,
}

impl core::fmt::Debug for JobEmitter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobEmitter").field("job_id", &self.job_id).finish()
    }
}

fn encode<T: Serialize>(payload: &T) -> Result<String, EmitError> {
    serde_json::to_string(payload).map_err(|e| EmitError::Encode(e.to_string()))
}

impl JobEmitter {
    pub fn new(job_id: JobId, state: Arc<dyn JobStateStore>, log: Arc<dyn EventLog>) -> Self {
        Self { job_id, state, log }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Record a status change.
    ///
    /// Returns `Ok(false)` without writing anything when the record is gone
    /// or the lifecycle forbids the transition (e.g. `running` after
    /// `cancelled`).
    pub async fn emit_status(&self, status: JobStatus, total: Option<u64>) -> Result<bool, EmitError> {
        let Some(record) = self.state.get_job_state(self.job_id).await? else {
            warn!(job_id = %self.job_id, status = %status, "status emitted for missing job");
            return Ok(false);
        };
        if !record.status.can_transition_to(status) {
            warn!(
                job_id = %self.job_id,
                from = %record.status,
                to = %status,
                "ignoring status emission not allowed by lifecycle"
            );
            return Ok(false);
        }

        let data = encode(&StatusPayload { status, total })?;
        let offset = self.log.append(self.job_id, EventKind::Status, data).await?;

        match self.state.apply_status(self.job_id, status, total).await? {
            StatusChange::Applied { previous } => {
                debug!(job_id = %self.job_id, %offset, from = %previous, to = %status, "status applied");
            }
            StatusChange::Rejected { current } => {
                // Lost a race with another writer (usually a cancel).
                warn!(job_id = %self.job_id, %offset, current = %current, to = %status, "status logged but not applied");
            }
            StatusChange::Missing => {
                warn!(job_id = %self.job_id, %offset, "job expired before status merge");
            }
        }
        Ok(true)
    }

    /// Record progress.
    ///
    /// Returns `Ok(None)` without writing anything once the job is gone or
    /// has reached a terminal status.
    pub async fn emit_progress(&self, report: ProgressReport) -> Result<Option<EventOffset>, EmitError> {
        match self.state.get_job_state(self.job_id).await? {
            None => {
                warn!(job_id = %self.job_id, "progress emitted for missing job");
                return Ok(None);
            }
            Some(record) if record.status.is_terminal() => {
                debug!(job_id = %self.job_id, status = %record.status, "ignoring progress for finished job");
                return Ok(None);
            }
            Some(_) => {}
        }

        let progress = Progress::new(report.done, report.total);
        let payload = ProgressPayload::new(progress, report.metrics, report.current.clone());
        let offset = self
            .log
            .append(self.job_id, EventKind::Progress, encode(&payload)?)
            .await?;

        let merged = self
            .state
            .apply_progress(self.job_id, progress, report.metrics, report.current)
            .await?;
        if !merged {
            warn!(job_id = %self.job_id, %offset, "job expired before progress merge");
        }
        Ok(Some(offset))
    }

    /// Append a log line. Never touches the state projection.
    pub async fn emit_log(
        &self,
        level: LogLevel,
        msg: impl Into<String>,
        item_id: Option<String>,
    ) -> Result<EventOffset, EmitError> {
        let payload = LogPayload {
            ts: Utc::now(),
            level,
            msg: msg.into(),
            item_id,
        };
        Ok(self
            .log
            .append(self.job_id, EventKind::Log, encode(&payload)?)
            .await?)
    }

    /// Whether a caller asked for this job to stop.
    ///
    /// Storage errors read as "not cancelled" so a flaky store cannot abort
    /// work on its own.
    pub async fn cancel_check(&self) -> bool {
        match self.state.is_cancelled(self.job_id).await {
            Ok(cancelled) => cancelled,
            Err(err) => {
                warn!(job_id = %self.job_id, error = %err, "cancel check failed; continuing");
                false
            }
        }
    }

    /// Status as currently projected; `None` once the record is gone.
    pub async fn current_status(&self) -> Result<Option<JobStatus>, EmitError> {
        Ok(self
            .state
            .get_job_state(self.job_id)
            .await?
            .map(|record| record.status))
    }

    /// Store a result blob under `key` for later download.
    pub async fn put_data(&self, key: &str, value: JsonValue) -> Result<(), EmitError> {
        Ok(self.state.set_job_data(self.job_id, key, value).await?)
    }
}
