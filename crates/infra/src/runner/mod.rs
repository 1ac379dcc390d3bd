//! Bounded worker pool that runs job handlers.
//!
//! ## Design
//!
//! - Submissions go through a bounded queue; a full queue is reported to the
//!   caller instead of growing without limit
//! - At most `max_concurrent` handlers run at once
//! - Each job runs in its own task; errors and panics stop at that boundary
//!   and become a `failed` status plus an error log line
//! - A concurrency slot attached to a submission is released whatever the outcome
//! - `shutdown` stops intake, fails still-queued jobs and waits for in-flight ones

mod context;

pub use context::{JobContext, JobHandler, JobSubmission, SlotClaim};

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use jobstream_core::JobStatus;
use jobstream_events::LogLevel;

use crate::emitter::JobEmitter;
use crate::event_log::EventLog;
use crate::limiter::ConcurrencyLimiter;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::state::JobStateStore;

/// Job runner configuration.
#[derive(Debug, Clone)]
pub struct JobRunnerConfig {
    /// Name for logging
    pub name: String,
    /// Maximum concurrent jobs
    pub max_concurrent: usize,
    /// Submissions buffered before `submit` reports `QueueFull`
    pub queue_capacity: usize,
    /// Policy handed to handlers for upstream calls
    pub retry_policy: RetryPolicy,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            name: "job-runner".to_string(),
            max_concurrent: 8,
            queue_capacity: 256,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl JobRunnerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    #[error("job queue is full")]
    QueueFull,
    #[error("job runner is shutting down")]
    ShuttingDown,
}

/// Runner statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RunnerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub jobs_panicked: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Succeeded,
    Failed,
    Cancelled,
    Panicked,
}

/// Handle to a running job runner.
#[derive(Debug)]
pub struct JobRunnerHandle {
    patterns: Vec<String>,
    queue: mpsc::Sender<JobSubmission>,
    shutdown: watch::Sender<bool>,
    join: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<Mutex<RunnerStats>>,
    started: Instant,
}

impl JobRunnerHandle {
    /// Queue a job. Never waits.
    pub fn submit(&self, submission: JobSubmission) -> Result<(), RunnerError> {
        if *self.shutdown.borrow() {
            return Err(RunnerError::ShuttingDown);
        }
        self.queue.try_send(submission).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => RunnerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => RunnerError::ShuttingDown,
        })
    }

    /// Whether a registered handler matches `job_type`.
    pub fn accepts(&self, job_type: &str) -> bool {
        resolve_pattern(self.patterns.iter().map(String::as_str), job_type).is_some()
    }

    pub fn stats(&self) -> RunnerStats {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    /// Stop accepting work and wait for in-flight jobs. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let join = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(join) = join {
            if let Err(err) = join.await {
                error!(error = %err, "job runner dispatcher ended abnormally");
            }
        }
    }
}

/// Pick the registered pattern serving `job_type`: the exact name, else the
/// longest `prefix.*` ("feed.csv.*" over "feed.*"), else `*`.
fn resolve_pattern<'a>(patterns: impl Iterator<Item = &'a str>, job_type: &str) -> Option<&'a str> {
    let mut best: Option<&'a str> = None;
    let mut fallback = None;
    for pattern in patterns {
        if pattern == job_type {
            return Some(pattern);
        }
        if pattern == "*" {
            fallback = Some(pattern);
            continue;
        }
        if let Some(prefix) = pattern.strip_suffix(".*") {
            let matches = job_type
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'));
            if matches && best.is_none_or(|b| pattern.len() > b.len()) {
                best = Some(pattern);
            }
        }
    }
    best.or(fallback)
}

/// Shared collaborators of every job task.
#[derive(Clone)]
struct Deps {
    state: Arc<dyn JobStateStore>,
    log: Arc<dyn EventLog>,
    limiter: Arc<dyn ConcurrencyLimiter>,
    retry: RetryExecutor,
}

/// Job runner: handler registry plus the stores jobs report into.
pub struct JobRunner {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    state: Arc<dyn JobStateStore>,
    log: Arc<dyn EventLog>,
    limiter: Arc<dyn ConcurrencyLimiter>,
}

impl JobRunner {
    pub fn new(
        state: Arc<dyn JobStateStore>,
        log: Arc<dyn EventLog>,
        limiter: Arc<dyn ConcurrencyLimiter>,
    ) -> Self {
        Self {
            handlers: HashMap::new(),
            state,
            log,
            limiter,
        }
    }

    /// Register a handler for a job type: exact name, `prefix.*`, or `*`.
    pub fn register_handler<H>(&mut self, pattern: impl Into<String>, handler: H)
    where
        H: JobHandler + 'static,
    {
        self.handlers.insert(pattern.into(), Arc::new(handler));
    }

    pub fn has_handler(&self, job_type: &str) -> bool {
        self.handler_for(job_type).is_some()
    }

    fn handler_for(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        resolve_pattern(self.handlers.keys().map(String::as_str), job_type)
            .and_then(|pattern| self.handlers.get(pattern).cloned())
    }

    /// Job types (patterns) this runner knows.
    pub fn patterns(&self) -> Vec<String> {
        let mut out: Vec<String> = self.handlers.keys().cloned().collect();
        out.sort();
        out
    }

    /// Start the dispatcher on the current runtime.
    pub fn spawn(self, config: JobRunnerConfig) -> JobRunnerHandle {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let patterns = self.patterns();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(RunnerStats::default()));

        let join = tokio::spawn(dispatch_loop(self, config, queue_rx, shutdown_rx, stats.clone()));

        JobRunnerHandle {
            patterns,
            queue: queue_tx,
            shutdown: shutdown_tx,
            join: Mutex::new(Some(join)),
            stats,
            started: Instant::now(),
        }
    }
}

fn record(stats: &Mutex<RunnerStats>, result: Result<JobOutcome, JoinError>) {
    let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
    s.current_running = s.current_running.saturating_sub(1);
    s.jobs_processed += 1;
    match result {
        Ok(JobOutcome::Succeeded) => s.jobs_succeeded += 1,
        Ok(JobOutcome::Cancelled) => s.jobs_cancelled += 1,
        Ok(JobOutcome::Failed) => s.jobs_failed += 1,
        Ok(JobOutcome::Panicked) => {
            s.jobs_failed += 1;
            s.jobs_panicked += 1;
        }
        Err(err) => {
            // The lifecycle task itself never panics on purpose.
            error!(error = %err, "job task aborted");
            s.jobs_failed += 1;
        }
    }
}

async fn dispatch_loop(
    runner: JobRunner,
    config: JobRunnerConfig,
    mut queue: mpsc::Receiver<JobSubmission>,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<Mutex<RunnerStats>>,
) {
    info!(runner = %config.name, max_concurrent = config.max_concurrent, "job runner started");

    let deps = Deps {
        state: runner.state.clone(),
        log: runner.log.clone(),
        limiter: runner.limiter.clone(),
        retry: RetryExecutor::new(config.retry_policy.clone()),
    };
    let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let mut tasks: JoinSet<JobOutcome> = JoinSet::new();

    loop {
        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = permits.clone().acquire_owned() => permit,
            Some(done) = tasks.join_next() => {
                record(&stats, done);
                continue;
            }
        };
        let Ok(permit) = permit else { break };

        let submission = tokio::select! {
            _ = shutdown.changed() => break,
            next = queue.recv() => match next {
                Some(submission) => submission,
                None => break,
            },
            Some(done) = tasks.join_next() => {
                record(&stats, done);
                continue;
            }
        };

        let handler = runner.handler_for(&submission.job_type);
        debug!(runner = %config.name, job_id = %submission.job_id, job_type = %submission.job_type, "dispatching job");
        {
            let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
            s.current_running += 1;
        }
        let deps = deps.clone();
        tasks.spawn(async move {
            let outcome = execute(&deps, submission, handler).await;
            drop(permit);
            outcome
        });
    }

    // Anything still queued will never run.
    queue.close();
    while let Some(submission) = queue.recv().await {
        let emitter = JobEmitter::new(submission.job_id, deps.state.clone(), deps.log.clone());
        if emitter.cancel_check().await {
            finish(&emitter).await;
        } else {
            fail(&emitter, "job runner shut down before the job started").await;
        }
        release_slot(&deps, &submission).await;
    }
    while let Some(done) = tasks.join_next().await {
        record(&stats, done);
    }

    info!(runner = %config.name, "job runner stopped");
}

/// Full lifecycle of one job. Never panics past this point.
async fn execute(deps: &Deps, submission: JobSubmission, handler: Option<Arc<dyn JobHandler>>) -> JobOutcome {
    let job_id = submission.job_id;
    let emitter = JobEmitter::new(job_id, deps.state.clone(), deps.log.clone());
    let started = Instant::now();

    let outcome = match handler {
        None => {
            warn!(job_id = %job_id, job_type = %submission.job_type, "no handler for job type");
            fail(&emitter, &format!("no handler for job type: {}", submission.job_type)).await;
            JobOutcome::Failed
        }
        Some(handler) => run_handler(deps, &emitter, &submission, handler).await,
    };

    release_slot(deps, &submission).await;
    info!(
        job_id = %job_id,
        job_type = %submission.job_type,
        outcome = ?outcome,
        duration_ms = started.elapsed().as_millis() as u64,
        "job finished"
    );
    outcome
}

async fn run_handler(
    deps: &Deps,
    emitter: &JobEmitter,
    submission: &JobSubmission,
    handler: Arc<dyn JobHandler>,
) -> JobOutcome {
    let job_id = submission.job_id;

    if emitter.cancel_check().await {
        debug!(job_id = %job_id, "job cancelled before start");
        return finish(emitter).await;
    }
    match emitter.emit_status(JobStatus::Running, None).await {
        Ok(true) => {}
        // Cancelled (or expired) between the check and the write.
        Ok(false) => return finish(emitter).await,
        Err(err) => {
            error!(job_id = %job_id, error = %err, "could not mark job running");
            return JobOutcome::Failed;
        }
    }

    let ctx = JobContext {
        job_id,
        tenant_id: submission.tenant_id.clone(),
        job_type: submission.job_type.clone(),
        params: submission.params.clone(),
        emitter: emitter.clone(),
        retry: deps.retry.clone(),
    };

    // Run in a nested task so a panic surfaces as a JoinError here.
    match tokio::spawn(async move { handler.run(ctx).await }).await {
        Ok(Ok(())) => finish(emitter).await,
        Ok(Err(err)) => {
            warn!(job_id = %job_id, error = %format!("{err:#}"), "job handler failed");
            fail(emitter, &format!("{err:#}")).await;
            JobOutcome::Failed
        }
        Err(join) if join.is_panic() => {
            let msg = panic_message(join.into_panic());
            error!(job_id = %job_id, panic = %msg, "job handler panicked");
            fail(emitter, &format!("job handler panicked: {msg}")).await;
            JobOutcome::Panicked
        }
        Err(join) => {
            warn!(job_id = %job_id, error = %join, "job handler task cancelled");
            fail(emitter, "job handler was aborted").await;
            JobOutcome::Failed
        }
    }
}

/// Settle a job whose handler returned normally.
async fn finish(emitter: &JobEmitter) -> JobOutcome {
    let job_id = emitter.job_id();
    let current = match emitter.current_status().await {
        Ok(Some(status)) => status,
        Ok(None) => {
            warn!(job_id = %job_id, "job expired before it finished");
            return JobOutcome::Failed;
        }
        Err(err) => {
            error!(job_id = %job_id, error = %err, "could not read final status");
            return JobOutcome::Failed;
        }
    };

    // The handler may already have settled the job itself.
    match current {
        JobStatus::Done => return JobOutcome::Succeeded,
        JobStatus::Failed => return JobOutcome::Failed,
        _ => {}
    }

    let cancelled = current == JobStatus::Cancelled || emitter.cancel_check().await;
    let target = if cancelled {
        JobStatus::Cancelled
    } else {
        JobStatus::Done
    };
    match emitter.emit_status(target, None).await {
        Ok(true) if cancelled => JobOutcome::Cancelled,
        Ok(true) => JobOutcome::Succeeded,
        Ok(false) => {
            // A cancel landed between the check and the write.
            if let Err(err) = emitter.emit_status(JobStatus::Cancelled, None).await {
                error!(job_id = %job_id, error = %err, "could not record cancellation");
            }
            JobOutcome::Cancelled
        }
        Err(err) => {
            error!(job_id = %job_id, error = %err, "could not record final status");
            JobOutcome::Failed
        }
    }
}

/// Record a failure: an error log line, then the `failed` status.
async fn fail(emitter: &JobEmitter, message: &str) {
    let job_id = emitter.job_id();
    if let Err(err) = emitter.emit_log(LogLevel::Error, message, None).await {
        error!(job_id = %job_id, error = %err, "could not log job failure");
    }
    if let Err(err) = emitter.emit_status(JobStatus::Failed, None).await {
        error!(job_id = %job_id, error = %err, "could not mark job failed");
    }
}

async fn release_slot(deps: &Deps, submission: &JobSubmission) {
    if let Some(slot) = &submission.slot {
        if let Err(err) = deps.limiter.release(&slot.tenant, &slot.resource).await {
            warn!(job_id = %submission.job_id, tenant_id = %slot.tenant, resource = %slot.resource, error = %err, "failed to release concurrency slot");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::ProgressReport;
    use crate::event_log::InMemoryEventLog;
    use crate::limiter::{InMemoryConcurrencyLimiter, ResourceKind};
    use crate::state::InMemoryJobStateStore;
    use async_trait::async_trait;
    use jobstream_core::{JobId, JobRecord, NewJob, TenantId};
    use jobstream_events::{EventKind, EventOffset, LogPayload};
    use std::time::Duration;

    const TEST_POLL: Duration = Duration::from_millis(5);

    struct Stores {
        state: Arc<InMemoryJobStateStore>,
        log: Arc<InMemoryEventLog>,
        limiter: Arc<InMemoryConcurrencyLimiter>,
    }

    fn stores() -> Stores {
        Stores {
            state: Arc::new(InMemoryJobStateStore::default()),
            log: Arc::new(InMemoryEventLog::default()),
            limiter: Arc::new(InMemoryConcurrencyLimiter::default()),
        }
    }

    fn runner(s: &Stores) -> JobRunner {
        JobRunner::new(s.state.clone(), s.log.clone(), s.limiter.clone())
    }

    fn tenant() -> TenantId {
        TenantId::parse("store_a").unwrap()
    }

    async fn create(s: &Stores, job_type: &str) -> JobRecord {
        let (job_id, _) = s
            .state
            .create_job(NewJob::new(tenant(), job_type, serde_json::json!({"n": 3})))
            .await
            .unwrap();
        s.state.get_job_state(job_id).await.unwrap().unwrap()
    }

    async fn wait_terminal(s: &Stores, job_id: JobId) -> JobRecord {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let rec = s.state.get_job_state(job_id).await.unwrap().unwrap();
                if rec.status.is_terminal() {
                    return rec;
                }
                tokio::time::sleep(TEST_POLL).await;
            }
        })
        .await
        .expect("job reached a terminal status")
    }

    async fn error_lines(s: &Stores, job_id: JobId) -> Vec<String> {
        s.log
            .read_after(job_id, EventOffset::ZERO, 100, Duration::ZERO)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EventKind::Log)
            .filter_map(|e| e.decode::<LogPayload>().ok())
            .filter(|l| l.level == LogLevel::Error)
            .map(|l| l.msg)
            .collect()
    }

    struct Counting;

    #[async_trait]
    impl JobHandler for Counting {
        async fn run(&self, ctx: JobContext) -> anyhow::Result<()> {
            let total = ctx.params["n"].as_u64().unwrap_or(0);
            ctx.emit_status(JobStatus::Running, Some(total)).await?;
            for done in 1..=total {
                ctx.emit_progress(ProgressReport::new(done, total)).await?;
            }
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl JobHandler for Failing {
        async fn run(&self, _ctx: JobContext) -> anyhow::Result<()> {
            anyhow::bail!("upstream rejected the batch")
        }
    }

    struct Panicking;

    #[async_trait]
    impl JobHandler for Panicking {
        async fn run(&self, _ctx: JobContext) -> anyhow::Result<()> {
            panic!("index out of range")
        }
    }

    struct UntilCancelled;

    #[async_trait]
    impl JobHandler for UntilCancelled {
        async fn run(&self, ctx: JobContext) -> anyhow::Result<()> {
            while !ctx.cancel_check().await {
                tokio::time::sleep(TEST_POLL).await;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn successful_job_is_marked_done() {
        let s = stores();
        let mut r = runner(&s);
        r.register_handler("count", Counting);
        let handle = r.spawn(JobRunnerConfig::default());

        let rec = create(&s, "count").await;
        handle.submit(JobSubmission::from_record(&rec)).unwrap();

        let done = wait_terminal(&s, rec.job_id).await;
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.progress.percent, 100);

        handle.shutdown().await;
        let stats = handle.stats();
        assert_eq!(stats.jobs_processed, 1);
        assert_eq!(stats.jobs_succeeded, 1);
        assert_eq!(stats.current_running, 0);
    }

    #[tokio::test]
    async fn handler_error_fails_job_and_releases_slot() {
        let s = stores();
        let mut r = runner(&s);
        r.register_handler("fail", Failing);
        let handle = r.spawn(JobRunnerConfig::default());

        s.limiter.acquire(&tenant(), &ResourceKind::Jobs, 2).await.unwrap();
        let rec = create(&s, "fail").await;
        handle
            .submit(JobSubmission::from_record(&rec).with_slot(ResourceKind::Jobs))
            .unwrap();

        assert_eq!(wait_terminal(&s, rec.job_id).await.status, JobStatus::Failed);
        handle.shutdown().await;

        assert_eq!(error_lines(&s, rec.job_id).await, vec!["upstream rejected the batch"]);
        assert_eq!(s.limiter.current(&tenant(), &ResourceKind::Jobs).await.unwrap(), 0);
        assert_eq!(handle.stats().jobs_failed, 1);
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        let s = stores();
        let mut r = runner(&s);
        r.register_handler("boom", Panicking);
        r.register_handler("count", Counting);
        let handle = r.spawn(JobRunnerConfig::default());

        let bad = create(&s, "boom").await;
        handle.submit(JobSubmission::from_record(&bad)).unwrap();
        assert_eq!(wait_terminal(&s, bad.job_id).await.status, JobStatus::Failed);
        assert!(error_lines(&s, bad.job_id).await[0].contains("index out of range"));

        // The runner keeps working afterwards.
        let good = create(&s, "count").await;
        handle.submit(JobSubmission::from_record(&good)).unwrap();
        assert_eq!(wait_terminal(&s, good.job_id).await.status, JobStatus::Done);

        handle.shutdown().await;
        let stats = handle.stats();
        assert_eq!(stats.jobs_panicked, 1);
        assert_eq!(stats.jobs_succeeded, 1);
    }

    #[tokio::test]
    async fn cooperative_cancellation() {
        let s = stores();
        let mut r = runner(&s);
        r.register_handler("loop", UntilCancelled);
        let handle = r.spawn(JobRunnerConfig::default());

        let rec = create(&s, "loop").await;
        handle.submit(JobSubmission::from_record(&rec)).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while s.state.get_job_state(rec.job_id).await.unwrap().unwrap().status != JobStatus::Running {
                tokio::time::sleep(TEST_POLL).await;
            }
        })
        .await
        .unwrap();
        assert!(s.state.cancel_job(rec.job_id).await.unwrap());

        handle.shutdown().await;
        let rec = s.state.get_job_state(rec.job_id).await.unwrap().unwrap();
        assert_eq!(rec.status, JobStatus::Cancelled);
        assert_eq!(handle.stats().jobs_cancelled, 1);
    }

    #[tokio::test]
    async fn unknown_job_type_fails() {
        let s = stores();
        let handle = runner(&s).spawn(JobRunnerConfig::default());

        let rec = create(&s, "nobody.handles.this").await;
        handle.submit(JobSubmission::from_record(&rec)).unwrap();

        assert_eq!(wait_terminal(&s, rec.job_id).await.status, JobStatus::Failed);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn full_queue_and_shutdown_are_reported() {
        let s = stores();
        let mut r = runner(&s);
        r.register_handler("loop", UntilCancelled);
        let handle = r.spawn(
            JobRunnerConfig::default()
                .with_max_concurrent(1)
                .with_queue_capacity(1),
        );

        let mut results = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..4 {
            let rec = create(&s, "loop").await;
            ids.push(rec.job_id);
            results.push(handle.submit(JobSubmission::from_record(&rec)));
            tokio::task::yield_now().await;
        }
        assert!(results.contains(&Err(RunnerError::QueueFull)));

        for id in &ids {
            s.state.cancel_job(*id).await.unwrap();
        }
        handle.shutdown().await;

        let rec = create(&s, "loop").await;
        assert_eq!(
            handle.submit(JobSubmission::from_record(&rec)),
            Err(RunnerError::ShuttingDown)
        );
    }

    #[test]
    fn handler_matching_prefers_exact_then_longest_prefix_then_wildcard() {
        let s = stores();
        let mut r = runner(&s);
        r.register_handler("feed.*", Counting);
        r.register_handler("feed.csv.*", Failing);
        r.register_handler("feed.generate", Panicking);

        assert!(r.has_handler("feed.generate"));
        assert!(r.has_handler("feed.csv.export"));
        assert!(r.has_handler("feed.other"));
        assert!(!r.has_handler("feedback"));
        assert!(!r.has_handler("upload.csv"));

        r.register_handler("*", Counting);
        assert!(r.has_handler("upload.csv"));
        assert_eq!(r.patterns(), vec!["*", "feed.*", "feed.csv.*", "feed.generate"]);
    }

    #[test]
    fn resolve_pattern_picks_the_most_specific_match() {
        let patterns = ["*", "feed.*", "feed.csv.*", "feed.generate"];
        let pick = |job_type| resolve_pattern(patterns.iter().copied(), job_type);

        assert_eq!(pick("feed.generate"), Some("feed.generate"));
        assert_eq!(pick("feed.csv.export"), Some("feed.csv.*"));
        assert_eq!(pick("feed.other"), Some("feed.*"));
        assert_eq!(pick("feedback"), Some("*"));
        assert_eq!(resolve_pattern(["feed.*"].into_iter(), "feedback"), None);
    }
}
