//! Append-only, per-job ordered event log.

mod in_memory;

pub use in_memory::InMemoryEventLog;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;

use jobstream_core::{CoreError, JobId};
use jobstream_events::{EventKind, EventOffset, JobEvent};

/// Upper bound on events returned by one `read_after` call inside `tail`.
pub const TAIL_BATCH: usize = 100;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EventLogError {
    #[error("event log unavailable: {0}")]
    Unavailable(String),
    #[error("malformed log entry {offset}: {reason}")]
    Malformed { offset: String, reason: String },
}

impl From<EventLogError> for CoreError {
    fn from(err: EventLogError) -> Self {
        CoreError::storage(err.to_string())
    }
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append one entry and return its offset. Offsets strictly increase per job.
    async fn append(&self, job_id: JobId, kind: EventKind, data: String) -> Result<EventOffset, EventLogError>;

    /// Up to `limit` entries with `offset > after`, oldest first.
    ///
    /// When none exist yet, waits up to `wait` for one to be appended and
    /// returns an empty batch if none arrives.
    async fn read_after(
        &self,
        job_id: JobId,
        after: EventOffset,
        limit: usize,
        wait: Duration,
    ) -> Result<Vec<JobEvent>, EventLogError>;

    /// Offset of the newest entry, `EventOffset::ZERO` when the log is empty.
    async fn head(&self, job_id: JobId) -> Result<EventOffset, EventLogError>;
}

/// One item of [`tail`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailItem {
    Event(JobEvent),
    /// A read succeeded but nothing new arrived within the wait.
    Idle,
}

/// Follow a job's log from `from`, yielding every later entry exactly once and
/// in order.
///
/// The stream never ends on its own. Every successful read that delivers no
/// new entry yields [`TailItem::Idle`]. Read errors are yielded and the next
/// poll resumes from the last delivered offset; pacing retries is up to the
/// consumer.
pub fn tail(
    log: Arc<dyn EventLog>,
    job_id: JobId,
    from: EventOffset,
    wait: Duration,
) -> impl Stream<Item = Result<TailItem, EventLogError>> + Send + 'static {
    async_stream::stream! {
        let mut cursor = from;
        loop {
            match log.read_after(job_id, cursor, TAIL_BATCH, wait).await {
                Ok(batch) => {
                    let mut delivered = false;
                    for event in batch {
                        if event.offset <= cursor {
                            continue;
                        }
                        cursor = event.offset;
                        delivered = true;
                        yield Ok(TailItem::Event(event));
                    }
                    if !delivered {
                        yield Ok(TailItem::Idle);
                    }
                }
                Err(err) => yield Err(err),
            }
        }
    }
}
