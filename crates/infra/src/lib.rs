//! Infrastructure layer: job state, event log, concurrency limits, streaming,
//! retries and the worker pool.
//!
//! Every store has an in-memory implementation (tests, single-process dev) and,
//! behind the `redis` feature, a Redis implementation sharing one injected
//! connection manager.

pub mod access;
pub mod emitter;
pub mod event_log;
pub mod limiter;
pub mod retry;
pub mod runner;
pub mod state;
pub mod streamer;
pub mod sweeper;

#[cfg(feature = "redis")]
pub mod redis_backend;

pub use access::{AccessGate, AccessScope};
pub use emitter::{EmitError, JobEmitter, ProgressReport};
pub use event_log::{tail, EventLog, EventLogError, InMemoryEventLog, TailItem};
pub use limiter::{Ceilings, ConcurrencyLimiter, InMemoryConcurrencyLimiter, LimiterError, ResourceKind};
pub use retry::{RetryExecutor, RetryPolicy, UpstreamFailure};
pub use runner::{
    JobContext, JobHandler, JobRunner, JobRunnerConfig, JobRunnerHandle, JobSubmission,
    RunnerError, RunnerStats, SlotClaim,
};
pub use state::{InMemoryJobStateStore, JobStateStore, StatusChange, StoreError};
pub use streamer::{EventStreamer, StreamOutcome, StreamSession, StreamerConfig};
pub use sweeper::{sweep, Purgeable, RetentionSweeper};

/// Default lifetime of every job record, log and counter.
pub const DEFAULT_RETENTION: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);
