use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;

use jobstream_core::JobId;
use jobstream_events::{EventKind, EventOffset, JobEvent};

use super::{EventLog, EventLogError};
use crate::sweeper::Purgeable;

#[derive(Debug)]
struct JobLog {
    events: Vec<JobEvent>,
    /// Last offset handed out; survives expiry so ids never go backwards.
    last: EventOffset,
    expires_at: Instant,
    appended: Arc<Notify>,
}

impl JobLog {
    fn new(expires_at: Instant) -> Self {
        Self {
            events: Vec::new(),
            last: EventOffset::ZERO,
            expires_at,
            appended: Arc::new(Notify::new()),
        }
    }

    fn expire_if_due(&mut self, now: Instant) {
        if self.expires_at <= now && !self.events.is_empty() {
            self.events.clear();
        }
    }

    fn after(&self, after: EventOffset, limit: usize) -> Vec<JobEvent> {
        let start = self.events.partition_point(|e| e.offset <= after);
        self.events[start..].iter().take(limit).cloned().collect()
    }
}

/// In-memory event log for tests/dev.
///
/// Offsets are generated like Redis stream ids; blocked readers are woken by a
/// per-job `Notify`.
#[derive(Debug)]
pub struct InMemoryEventLog {
    logs: Mutex<HashMap<JobId, JobLog>>,
    retention: Duration,
}

fn poisoned<T>(_: PoisonError<T>) -> EventLogError {
    EventLogError::Unavailable("event log lock poisoned".to_string())
}

fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

impl InMemoryEventLog {
    pub fn new(retention: Duration) -> Self {
        Self {
            logs: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Number of live entries for a job.
    pub fn len(&self, job_id: JobId) -> usize {
        let now = Instant::now();
        self.logs
            .lock()
            .ok()
            .and_then(|logs| {
                logs.get(&job_id)
                    .filter(|log| log.expires_at > now)
                    .map(|log| log.events.len())
            })
            .unwrap_or(0)
    }

    /// Batch under the lock, or the job's notifier when there is nothing to read.
    /// Never creates an entry for an unknown job.
    fn poll(&self, job_id: JobId, after: EventOffset, limit: usize) -> Result<Polled, EventLogError> {
        let now = Instant::now();
        let mut logs = self.logs.lock().map_err(poisoned)?;
        let Some(log) = logs.get_mut(&job_id) else {
            return Ok(Polled::Empty(None));
        };
        log.expire_if_due(now);

        let batch = log.after(after, limit);
        if batch.is_empty() {
            Ok(Polled::Empty(Some(log.appended.clone())))
        } else {
            Ok(Polled::Ready(batch))
        }
    }

    /// The job's notifier, registering an empty log so the next append wakes us.
    fn notifier(&self, job_id: JobId) -> Result<Arc<Notify>, EventLogError> {
        let now = Instant::now();
        let mut logs = self.logs.lock().map_err(poisoned)?;
        let log = logs
            .entry(job_id)
            .or_insert_with(|| JobLog::new(now + self.retention));
        Ok(log.appended.clone())
    }
}

enum Polled {
    Ready(Vec<JobEvent>),
    Empty(Option<Arc<Notify>>),
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new(crate::DEFAULT_RETENTION)
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, job_id: JobId, kind: EventKind, data: String) -> Result<EventOffset, EventLogError> {
        let now = Instant::now();
        let (offset, appended) = {
            let mut logs = self.logs.lock().map_err(poisoned)?;
            let log = logs
                .entry(job_id)
                .or_insert_with(|| JobLog::new(now + self.retention));
            log.expire_if_due(now);

            let offset = log.last.next(now_millis());
            log.last = offset;
            log.events.push(JobEvent::new(offset, kind, data));
            log.expires_at = now + self.retention;
            (offset, log.appended.clone())
        };
        appended.notify_waiters();
        Ok(offset)
    }

    async fn read_after(
        &self,
        job_id: JobId,
        after: EventOffset,
        limit: usize,
        wait: Duration,
    ) -> Result<Vec<JobEvent>, EventLogError> {
        let deadline = Instant::now() + wait;
        loop {
            let appended = match self.poll(job_id, after, limit)? {
                Polled::Ready(batch) => return Ok(batch),
                Polled::Empty(notify) => notify,
            };
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let appended = match appended {
                Some(notify) => notify,
                None => self.notifier(job_id)?,
            };

            let notified = appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // An append may have landed between the poll and `enable`.
            if let Polled::Ready(batch) = self.poll(job_id, after, limit)? {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn head(&self, job_id: JobId) -> Result<EventOffset, EventLogError> {
        let now = Instant::now();
        let logs = self.logs.lock().map_err(poisoned)?;
        Ok(logs
            .get(&job_id)
            .filter(|log| log.expires_at > now)
            .and_then(|log| log.events.last())
            .map(|e| e.offset)
            .unwrap_or(EventOffset::ZERO))
    }
}

impl Purgeable for InMemoryEventLog {
    fn name(&self) -> &'static str {
        "event_log"
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        match self.logs.lock() {
            Ok(mut logs) => {
                let before = logs.len();
                logs.retain(|_, log| log.expires_at > now);
                before - logs.len()
            }
            Err(_) => 0,
        }
    }
}
