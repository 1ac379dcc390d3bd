use async_trait::async_trait;
use serde_json::Value as JsonValue;

use jobstream_core::{JobId, JobRecord, JobStatus, TenantId};
use jobstream_events::{EventOffset, LogLevel};

use crate::emitter::{EmitError, JobEmitter, ProgressReport};
use crate::limiter::ResourceKind;
use crate::retry::RetryExecutor;

/// Business logic of one job type.
///
/// Handlers report through the context and poll `cancel_check` at points
/// where stopping is safe. Returning `Err` (or panicking) fails the job;
/// returning `Ok` without a terminal status lets the runner finish it.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()>;
}

/// Everything a handler gets to work with.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub job_type: String,
    pub params: JsonValue,
    pub emitter: JobEmitter,
    pub retry: RetryExecutor,
}

impl JobContext {
    pub async fn emit_status(&self, status: JobStatus, total: Option<u64>) -> Result<bool, EmitError> {
        self.emitter.emit_status(status, total).await
    }

    pub async fn emit_progress(&self, report: ProgressReport) -> Result<Option<EventOffset>, EmitError> {
        self.emitter.emit_progress(report).await
    }

    pub async fn emit_log(
        &self,
        level: LogLevel,
        msg: impl Into<String>,
        item_id: Option<String>,
    ) -> Result<EventOffset, EmitError> {
        self.emitter.emit_log(level, msg, item_id).await
    }

    pub async fn cancel_check(&self) -> bool {
        self.emitter.cancel_check().await
    }

    pub async fn put_data(&self, key: &str, value: JsonValue) -> Result<(), EmitError> {
        self.emitter.put_data(key, value).await
    }
}

/// Limiter slot held by a submission, released when the job ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotClaim {
    pub tenant: TenantId,
    pub resource: ResourceKind,
}

/// A created job handed to the runner.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub job_type: String,
    pub params: JsonValue,
    pub slot: Option<SlotClaim>,
}

impl JobSubmission {
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id,
            tenant_id: record.tenant_id.clone(),
            job_type: record.job_type.clone(),
            params: record.params.clone(),
            slot: None,
        }
    }

    pub fn with_slot(mut self, resource: ResourceKind) -> Self {
        self.slot = Some(SlotClaim {
            tenant: self.tenant_id.clone(),
            resource,
        });
        self
    }
}
