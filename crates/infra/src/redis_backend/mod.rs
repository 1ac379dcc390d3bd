//! Redis-backed stores sharing one connection manager.
//!
//! ## Key layout
//!
//! - `job:{id}:state`: hash with the job record
//! - `job:{id}:cancel`: cancellation flag
//! - `job:{id}:data:{key}`: side data (JSON text)
//! - `job:{id}:events`: stream with the event log
//! - `limit:{resource}:{tenant}`: concurrency counter
//!
//! Every key carries a TTL; nothing here needs sweeping.

mod event_log;
mod limiter;
mod state_store;

pub use event_log::RedisEventLog;
pub use limiter::RedisConcurrencyLimiter;
pub use state_store::RedisJobStateStore;

use std::time::Duration;

use redis::aio::ConnectionManager;
use tracing::info;

use jobstream_core::{JobId, TenantId};

use crate::event_log::EventLogError;
use crate::limiter::{LimiterError, ResourceKind};
use crate::state::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RedisBackendError {
    #[error("invalid redis url: {0}")]
    InvalidUrl(String),
    #[error("redis connection error: {0}")]
    Connection(String),
}

/// Connection handles created once at startup and cloned into each store.
#[derive(Clone)]
pub struct RedisBackend {
    client: redis::Client,
    manager: ConnectionManager,
}

impl core::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisBackend").finish_non_exhaustive()
    }
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self, RedisBackendError> {
        let client = redis::Client::open(url).map_err(|e| RedisBackendError::InvalidUrl(e.to_string()))?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| RedisBackendError::Connection(e.to_string()))?;
        info!("connected to redis");
        Ok(Self { client, manager })
    }

    pub fn state_store(&self, retention: Duration) -> RedisJobStateStore {
        RedisJobStateStore::new(self.manager.clone(), retention)
    }

    pub fn event_log(&self, retention: Duration) -> RedisEventLog {
        RedisEventLog::new(self.client.clone(), self.manager.clone(), retention)
    }

    pub fn limiter(&self, ttl: Duration) -> RedisConcurrencyLimiter {
        RedisConcurrencyLimiter::new(self.manager.clone(), ttl)
    }
}

pub(crate) fn state_key(job_id: JobId) -> String {
    format!("job:{job_id}:state")
}

pub(crate) fn cancel_key(job_id: JobId) -> String {
    format!("job:{job_id}:cancel")
}

pub(crate) fn data_key(job_id: JobId, key: &str) -> String {
    format!("job:{job_id}:data:{key}")
}

pub(crate) fn events_key(job_id: JobId) -> String {
    format!("job:{job_id}:events")
}

pub(crate) fn limit_key(tenant: &TenantId, resource: &ResourceKind) -> String {
    format!("limit:{resource}:{tenant}")
}

/// TTL in whole seconds, at least one.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<redis::RedisError> for EventLogError {
    fn from(err: redis::RedisError) -> Self {
        EventLogError::Unavailable(err.to_string())
    }
}

impl From<redis::RedisError> for LimiterError {
    fn from(err: redis::RedisError) -> Self {
        LimiterError::Unavailable(err.to_string())
    }
}
