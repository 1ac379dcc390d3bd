use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamId, StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, instrument};

use jobstream_core::JobId;
use jobstream_events::{EventKind, EventOffset, JobEvent};

use super::{events_key, ttl_secs};
use crate::event_log::{EventLog, EventLogError};

const KIND_FIELD: &str = "event";
const DATA_FIELD: &str = "data";

/// Event log on Redis streams, one stream per job.
///
/// Blocking reads (`XREAD BLOCK`) hold a connection for the whole wait, so
/// they go through a small pool of dedicated connections instead of the
/// shared manager.
#[derive(Clone)]
pub struct RedisEventLog {
    client: redis::Client,
    conn: ConnectionManager,
    retention: Duration,
    idle: Arc<Mutex<Vec<MultiplexedConnection>>>,
}

impl RedisEventLog {
    pub fn new(client: redis::Client, conn: ConnectionManager, retention: Duration) -> Self {
        Self {
            client,
            conn,
            retention,
            idle: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn blocking_conn(&self) -> Result<MultiplexedConnection, EventLogError> {
        let pooled = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        match pooled {
            Some(conn) => Ok(conn),
            None => {
                debug!("opening blocking-read connection");
                Ok(self.client.get_multiplexed_async_connection().await?)
            }
        }
    }

    fn return_conn(&self, conn: MultiplexedConnection) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(conn);
        }
    }
}

/// Turn one stream entry into an event.
pub(crate) fn decode_entry(entry: &StreamId) -> Result<JobEvent, EventLogError> {
    let malformed = |reason: String| EventLogError::Malformed {
        offset: entry.id.clone(),
        reason,
    };
    let offset: EventOffset = entry.id.parse().map_err(|e: jobstream_events::OffsetParseError| malformed(e.to_string()))?;
    let kind: String = entry
        .get(KIND_FIELD)
        .ok_or_else(|| malformed(format!("missing {KIND_FIELD} field")))?;
    let kind: EventKind = kind.parse().map_err(malformed)?;
    let data: String = entry
        .get(DATA_FIELD)
        .ok_or_else(|| malformed(format!("missing {DATA_FIELD} field")))?;
    Ok(JobEvent::new(offset, kind, data))
}

#[async_trait]
impl EventLog for RedisEventLog {
    #[instrument(skip(self, data), err)]
    async fn append(&self, job_id: JobId, kind: EventKind, data: String) -> Result<EventOffset, EventLogError> {
        let key = events_key(job_id);
        let mut conn = self.conn.clone();
        let (id,): (String,) = redis::pipe()
            .atomic()
            .xadd(&key, "*", &[(KIND_FIELD, kind.as_str()), (DATA_FIELD, data.as_str())])
            .expire(&key, ttl_secs(self.retention) as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        id.parse().map_err(|e: jobstream_events::OffsetParseError| EventLogError::Malformed {
            offset: id.clone(),
            reason: e.to_string(),
        })
    }

    async fn read_after(
        &self,
        job_id: JobId,
        after: EventOffset,
        limit: usize,
        wait: Duration,
    ) -> Result<Vec<JobEvent>, EventLogError> {
        let key = events_key(job_id);
        let cursor = after.to_string();
        let mut options = StreamReadOptions::default().count(limit);

        let reply: Option<StreamReadReply> = if wait.is_zero() {
            let mut conn = self.conn.clone();
            conn.xread_options(&[&key], &[&cursor], &options).await?
        } else {
            // BLOCK 0 would wait forever.
            let block_ms = usize::try_from(wait.as_millis()).unwrap_or(usize::MAX).max(1);
            options = options.block(block_ms);
            let mut conn = self.blocking_conn().await?;
            let reply = conn.xread_options(&[&key], &[&cursor], &options).await?;
            self.return_conn(conn);
            reply
        };

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };
        reply
            .keys
            .iter()
            .flat_map(|stream| stream.ids.iter())
            .map(decode_entry)
            .collect()
    }

    async fn head(&self, job_id: JobId) -> Result<EventOffset, EventLogError> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn.xrevrange_count(events_key(job_id), "+", "-", 1).await?;
        match reply.ids.first() {
            Some(entry) => Ok(decode_entry(entry)?.offset),
            None => Ok(EventOffset::ZERO),
        }
    }
}
