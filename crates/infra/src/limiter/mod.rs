//! Per-tenant concurrency ceilings.

mod in_memory;

pub use in_memory::InMemoryConcurrencyLimiter;

use async_trait::async_trait;

use jobstream_core::{CoreError, TenantId};

/// Bounded per-tenant resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Uploads,
    Jobs,
    Custom(String),
}

impl ResourceKind {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceKind::Uploads => "uploads",
            ResourceKind::Jobs => "jobs",
            ResourceKind::Custom(name) => name,
        }
    }

    /// Slot a job type draws from: `upload.*` types count as uploads.
    pub fn for_job_type(job_type: &str) -> Self {
        if job_type == "upload" || job_type.starts_with("upload.") {
            ResourceKind::Uploads
        } else {
            ResourceKind::Jobs
        }
    }
}

impl core::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured ceilings per resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ceilings {
    pub jobs: u32,
    pub uploads: u32,
    /// Applied to `Custom` resources.
    pub custom: u32,
}

impl Default for Ceilings {
    fn default() -> Self {
        Self {
            jobs: 2,
            uploads: 3,
            custom: 2,
        }
    }
}

impl Ceilings {
    pub fn for_resource(&self, resource: &ResourceKind) -> u32 {
        match resource {
            ResourceKind::Jobs => self.jobs,
            ResourceKind::Uploads => self.uploads,
            ResourceKind::Custom(_) => self.custom,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimiterError {
    #[error("too many concurrent {resource} (limit {ceiling})")]
    RateLimited { resource: String, ceiling: u32 },
    #[error("limiter unavailable: {0}")]
    Unavailable(String),
}

impl From<LimiterError> for CoreError {
    fn from(err: LimiterError) -> Self {
        match err {
            LimiterError::RateLimited { resource, ceiling } => CoreError::rate_limited(resource, ceiling),
            LimiterError::Unavailable(msg) => CoreError::storage(msg),
        }
    }
}

/// Counting semaphore per `(tenant, resource)`.
///
/// `acquire` is atomic: the observed counter never exceeds the ceiling, even
/// under concurrent callers. Counters carry a safety TTL so a crashed holder
/// cannot wedge a tenant forever.
#[async_trait]
pub trait ConcurrencyLimiter: Send + Sync {
    /// Take one slot; returns the new count.
    async fn acquire(&self, tenant: &TenantId, resource: &ResourceKind, ceiling: u32) -> Result<u32, LimiterError>;

    /// Give one slot back (clamped at zero); returns the new count.
    async fn release(&self, tenant: &TenantId, resource: &ResourceKind) -> Result<u32, LimiterError>;

    async fn current(&self, tenant: &TenantId, resource: &ResourceKind) -> Result<u32, LimiterError>;
}
