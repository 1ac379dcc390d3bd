//! Live, resumable delivery of one job's events to one viewer.
//!
//! A session runs in its own task and pushes [`StreamFrame`]s into a bounded
//! channel: `connected`, an optional `snapshot`, then log events, heartbeats
//! and retry notices until the viewer goes away or the backing store keeps
//! failing. Sessions share nothing; any number may follow the same job.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use jobstream_core::JobId;
use jobstream_events::{EventOffset, StreamFrame};

use crate::event_log::{tail, EventLog, TailItem};
use crate::state::JobStateStore;

#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Idle time before a `ping` comment.
    pub heartbeat: Duration,
    /// Pause after a backing-store error.
    pub retry_pause: Duration,
    /// Consecutive errors that end the stream.
    pub max_consecutive_errors: u32,
    /// Frames buffered per viewer.
    pub channel_capacity: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(15),
            retry_pause: Duration::from_secs(1),
            max_consecutive_errors: 3,
            channel_capacity: 64,
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The viewer disconnected.
    ClosedNormally,
    /// The store kept failing; an `error` frame was sent.
    ClosedOnError,
}

/// A running stream: frames to forward, plus the task's result.
#[derive(Debug)]
pub struct StreamSession {
    pub frames: mpsc::Receiver<StreamFrame>,
    pub outcome: JoinHandle<StreamOutcome>,
}

#[derive(Clone)]
pub struct EventStreamer {
    state: Arc<dyn JobStateStore>,
    log: Arc<dyn EventLog>,
    config: StreamerConfig,
}

impl core::fmt::Debug for EventStreamer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventStreamer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Consecutive-error bookkeeping shared by the head lookup and the tail loop.
struct ErrorBudget {
    consecutive: u32,
    max: u32,
    pause: Duration,
}

enum Next {
    Retry,
    GiveUp,
}

impl ErrorBudget {
    async fn on_error(
        &mut self,
        job_id: JobId,
        err: impl core::fmt::Display,
        tx: &mpsc::Sender<StreamFrame>,
    ) -> Next {
        self.consecutive += 1;
        if self.consecutive >= self.max {
            warn!(job_id = %job_id, errors = self.consecutive, error = %err, "closing stream after repeated store errors");
            let _ = tx
                .send(StreamFrame::Error {
                    message: err.to_string(),
                })
                .await;
            return Next::GiveUp;
        }

        warn!(job_id = %job_id, errors = self.consecutive, error = %err, "store error while streaming; retrying");
        let notice = StreamFrame::Heartbeat(format!("retrying_connection_{}", self.consecutive));
        if tx.send(notice).await.is_err() {
            return Next::GiveUp;
        }
        tokio::select! {
            _ = tx.closed() => Next::GiveUp,
            _ = tokio::time::sleep(self.pause) => Next::Retry,
        }
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }
}

impl EventStreamer {
    pub fn new(state: Arc<dyn JobStateStore>, log: Arc<dyn EventLog>, config: StreamerConfig) -> Self {
        Self { state, log, config }
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    /// Start streaming `job_id`.
    ///
    /// `resume` is the last offset the viewer saw; `None` means "only events
    /// appended from now on", resolved once against the log head.
    pub fn open(&self, job_id: JobId, resume: Option<EventOffset>) -> StreamSession {
        let (tx, frames) = mpsc::channel(self.config.channel_capacity.max(1));
        let streamer = self.clone();
        let outcome = tokio::spawn(async move { streamer.run(job_id, resume, tx).await });
        StreamSession { frames, outcome }
    }

    async fn run(
        self,
        job_id: JobId,
        resume: Option<EventOffset>,
        tx: mpsc::Sender<StreamFrame>,
    ) -> StreamOutcome {
        let mut budget = ErrorBudget {
            consecutive: 0,
            max: self.config.max_consecutive_errors.max(1),
            pause: self.config.retry_pause,
        };

        // Connecting.
        if tx.send(StreamFrame::Connected { job_id }).await.is_err() {
            return StreamOutcome::ClosedNormally;
        }
        let record = loop {
            match self.state.get_job_state(job_id).await {
                Ok(record) => break record,
                Err(err) => match budget.on_error(job_id, err, &tx).await {
                    Next::Retry => continue,
                    Next::GiveUp => return self.finish(job_id, &tx),
                },
            }
        };
        budget.reset();
        match record {
            Some(record) => {
                if tx.send(StreamFrame::Snapshot(record.snapshot())).await.is_err() {
                    return StreamOutcome::ClosedNormally;
                }
            }
            None => debug!(job_id = %job_id, "no record for snapshot"),
        }

        let from = match resume {
            Some(offset) => offset,
            None => loop {
                match self.log.head(job_id).await {
                    Ok(head) => {
                        budget.reset();
                        break head;
                    }
                    Err(err) => match budget.on_error(job_id, err, &tx).await {
                        Next::Retry => continue,
                        Next::GiveUp => return self.finish(job_id, &tx),
                    },
                }
            },
        };

        // Streaming.
        info!(job_id = %job_id, from = %from, "stream opened");
        let heartbeat = self.config.heartbeat;
        let mut events = Box::pin(tail(self.log.clone(), job_id, from, heartbeat));
        let mut ping_at = Instant::now() + heartbeat;
        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    debug!(job_id = %job_id, "viewer disconnected");
                    return StreamOutcome::ClosedNormally;
                }
                next = tokio::time::timeout_at(ping_at, events.next()) => next,
            };

            let frame = match next {
                Err(_idle) => StreamFrame::ping(),
                Ok(Some(Ok(TailItem::Event(event)))) => {
                    budget.reset();
                    StreamFrame::Event(event)
                }
                Ok(Some(Ok(TailItem::Idle))) => {
                    budget.reset();
                    if Instant::now() < ping_at {
                        continue;
                    }
                    StreamFrame::ping()
                }
                Ok(Some(Err(err))) => match budget.on_error(job_id, err, &tx).await {
                    Next::Retry => {
                        ping_at = Instant::now() + heartbeat;
                        continue;
                    }
                    Next::GiveUp => return self.finish(job_id, &tx),
                },
                Ok(None) => return StreamOutcome::ClosedNormally,
            };

            if tx.send(frame).await.is_err() {
                debug!(job_id = %job_id, "viewer disconnected");
                return StreamOutcome::ClosedNormally;
            }
            ping_at = Instant::now() + heartbeat;
        }
    }

    fn finish(&self, job_id: JobId, tx: &mpsc::Sender<StreamFrame>) -> StreamOutcome {
        if tx.is_closed() {
            debug!(job_id = %job_id, "viewer disconnected during retry");
            StreamOutcome::ClosedNormally
        } else {
            StreamOutcome::ClosedOnError
        }
    }
}
