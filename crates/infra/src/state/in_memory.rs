use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::time::Instant;
use tracing::debug;

use jobstream_auth::generate_token;
use jobstream_core::{JobId, JobRecord, JobStatus, JobToken, Metrics, NewJob, Progress};

use super::{JobStateStore, StatusChange, StoreError};
use crate::sweeper::Purgeable;

#[derive(Debug)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn live(&self, now: Instant) -> Option<&T> {
        (self.expires_at > now).then_some(&self.value)
    }
}

/// In-memory job state store for tests/dev.
///
/// Records, cancellation flags and side data live in separate maps, each entry
/// with its own expiry, mirroring the key layout of the Redis store.
#[derive(Debug)]
pub struct InMemoryJobStateStore {
    jobs: RwLock<HashMap<JobId, Expiring<JobRecord>>>,
    cancel_flags: RwLock<HashMap<JobId, Instant>>,
    data: RwLock<HashMap<(JobId, String), Expiring<JsonValue>>>,
    retention: Duration,
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Unavailable("state lock poisoned".to_string())
}

impl InMemoryJobStateStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            cancel_flags: RwLock::new(HashMap::new()),
            data: RwLock::new(HashMap::new()),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn expiry(&self) -> Instant {
        Instant::now() + self.retention
    }

    /// Run `f` on a live record, refreshing its expiry. `None` when missing.
    fn with_live<R>(
        &self,
        job_id: JobId,
        f: impl FnOnce(&mut JobRecord) -> R,
    ) -> Result<Option<R>, StoreError> {
        let now = Instant::now();
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        match jobs.get_mut(&job_id) {
            Some(entry) if entry.expires_at > now => {
                let out = f(&mut entry.value);
                entry.expires_at = now + self.retention;
                Ok(Some(out))
            }
            _ => Ok(None),
        }
    }
}

impl Default for InMemoryJobStateStore {
    fn default() -> Self {
        Self::new(crate::DEFAULT_RETENTION)
    }
}

#[async_trait]
impl JobStateStore for InMemoryJobStateStore {
    async fn create_job(&self, new: NewJob) -> Result<(JobId, JobToken), StoreError> {
        let job_id = JobId::new();
        let token = generate_token();
        let record = JobRecord::queued(job_id, token.clone(), new, Utc::now());

        let mut jobs = self.jobs.write().map_err(poisoned)?;
        jobs.insert(
            job_id,
            Expiring {
                value: record,
                expires_at: self.expiry(),
            },
        );
        Ok((job_id, token))
    }

    async fn get_job_state(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        Ok(jobs
            .get(&job_id)
            .and_then(|e| e.live(Instant::now()))
            .cloned())
    }

    async fn cancel_job(&self, job_id: JobId) -> Result<bool, StoreError> {
        let found = self.with_live(job_id, |record| {
            if !record.status.is_terminal() {
                record.status = JobStatus::Cancelled;
                record.updated_at = Utc::now();
            }
        })?;
        if found.is_none() {
            return Ok(false);
        }

        let mut flags = self.cancel_flags.write().map_err(poisoned)?;
        flags.insert(job_id, self.expiry());
        Ok(true)
    }

    async fn is_cancelled(&self, job_id: JobId) -> Result<bool, StoreError> {
        let flags = self.cancel_flags.read().map_err(poisoned)?;
        Ok(flags
            .get(&job_id)
            .is_some_and(|expires_at| *expires_at > Instant::now()))
    }

    async fn apply_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        total: Option<u64>,
    ) -> Result<StatusChange, StoreError> {
        let now = Instant::now();
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let Some(entry) = jobs.get_mut(&job_id).filter(|e| e.expires_at > now) else {
            return Ok(StatusChange::Missing);
        };

        let record = &mut entry.value;
        let previous = record.status;
        if !previous.can_transition_to(status) {
            debug!(job_id = %job_id, from = %previous, to = %status, "status transition rejected");
            return Ok(StatusChange::Rejected { current: previous });
        }

        record.status = status;
        if let Some(total) = total {
            record.progress = Progress::new(record.progress.done, total);
        }
        record.updated_at = Utc::now();
        entry.expires_at = now + self.retention;
        Ok(StatusChange::Applied { previous })
    }

    async fn apply_progress(
        &self,
        job_id: JobId,
        progress: Progress,
        metrics: Metrics,
        current: JsonValue,
    ) -> Result<bool, StoreError> {
        let merged = self.with_live(job_id, |record| {
            record.progress = progress;
            record.metrics = metrics;
            record.current = current;
            record.updated_at = Utc::now();
        })?;
        Ok(merged.is_some())
    }

    async fn set_job_data(&self, job_id: JobId, key: &str, value: JsonValue) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(poisoned)?;
        data.insert(
            (job_id, key.to_string()),
            Expiring {
                value,
                expires_at: self.expiry(),
            },
        );
        Ok(())
    }

    async fn get_job_data(&self, job_id: JobId, key: &str) -> Result<Option<JsonValue>, StoreError> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data
            .get(&(job_id, key.to_string()))
            .and_then(|e| e.live(Instant::now()))
            .cloned())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.jobs.read().map_err(poisoned).map(|_| ())
    }
}

impl Purgeable for InMemoryJobStateStore {
    fn name(&self) -> &'static str {
        "job_state"
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        if let Ok(mut jobs) = self.jobs.write() {
            let before = jobs.len();
            jobs.retain(|_, e| e.expires_at > now);
            removed += before - jobs.len();
        }
        if let Ok(mut flags) = self.cancel_flags.write() {
            let before = flags.len();
            flags.retain(|_, expires_at| *expires_at > now);
            removed += before - flags.len();
        }
        if let Ok(mut data) = self.data.write() {
            let before = data.len();
            data.retain(|_, e| e.expires_at > now);
            removed += before - data.len();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobstream_core::TenantId;

    fn store() -> InMemoryJobStateStore {
        InMemoryJobStateStore::new(Duration::from_secs(60))
    }

    fn new_job() -> NewJob {
        NewJob::new(
            TenantId::parse("store_a").unwrap(),
            "feed.generate",
            serde_json::json!({"limit": 3}),
        )
    }

    #[tokio::test]
    async fn create_then_read_back() {
        let store = store();
        let (job_id, token) = store.create_job(new_job().with_session("s-1")).await.unwrap();

        let rec = store.get_job_state(job_id).await.unwrap().unwrap();
        assert_eq!(rec.status, JobStatus::Queued);
        assert_eq!(rec.job_token, token);
        assert_eq!(rec.session_qualifier.as_deref(), Some("s-1"));
        assert_eq!(token.expose().len(), 64);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_unknown_is_false() {
        let store = store();
        let (job_id, _) = store.create_job(new_job()).await.unwrap();

        assert!(store.cancel_job(job_id).await.unwrap());
        assert!(store.cancel_job(job_id).await.unwrap());
        assert!(store.is_cancelled(job_id).await.unwrap());

        let rec = store.get_job_state(job_id).await.unwrap().unwrap();
        assert_eq!(rec.status, JobStatus::Cancelled);

        let unknown = JobId::new();
        assert!(!store.cancel_job(unknown).await.unwrap());
        assert!(!store.is_cancelled(unknown).await.unwrap());
    }

    #[tokio::test]
    async fn cancelling_a_finished_job_keeps_its_status() {
        let store = store();
        let (job_id, _) = store.create_job(new_job()).await.unwrap();
        store.apply_status(job_id, JobStatus::Running, None).await.unwrap();
        store.apply_status(job_id, JobStatus::Done, None).await.unwrap();

        assert!(store.cancel_job(job_id).await.unwrap());
        let rec = store.get_job_state(job_id).await.unwrap().unwrap();
        assert_eq!(rec.status, JobStatus::Done);
        assert!(store.is_cancelled(job_id).await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_job_refuses_later_status() {
        let store = store();
        let (job_id, _) = store.create_job(new_job()).await.unwrap();
        store.cancel_job(job_id).await.unwrap();

        assert_eq!(
            store.apply_status(job_id, JobStatus::Running, None).await.unwrap(),
            StatusChange::Rejected {
                current: JobStatus::Cancelled
            }
        );
        assert_eq!(
            store.apply_status(job_id, JobStatus::Done, None).await.unwrap(),
            StatusChange::Rejected {
                current: JobStatus::Cancelled
            }
        );
    }

    #[tokio::test]
    async fn status_total_recomputes_percent() {
        let store = store();
        let (job_id, _) = store.create_job(new_job()).await.unwrap();
        store
            .apply_progress(job_id, Progress::new(5, 0), Metrics::default(), JsonValue::Null)
            .await
            .unwrap();

        let change = store.apply_status(job_id, JobStatus::Running, Some(20)).await.unwrap();
        assert_eq!(
            change,
            StatusChange::Applied {
                previous: JobStatus::Queued
            }
        );

        let rec = store.get_job_state(job_id).await.unwrap().unwrap();
        assert_eq!(rec.progress, Progress::new(5, 20));
        assert_eq!(rec.progress.percent, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn records_expire_and_are_not_recreated() {
        let store = store();
        let (job_id, _) = store.create_job(new_job()).await.unwrap();
        store
            .set_job_data(job_id, "feed", serde_json::json!({"rows": 2}))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(store.get_job_state(job_id).await.unwrap().is_none());
        assert!(store.get_job_data(job_id, "feed").await.unwrap().is_none());
        assert_eq!(
            store.apply_status(job_id, JobStatus::Running, None).await.unwrap(),
            StatusChange::Missing
        );
        assert!(!store
            .apply_progress(job_id, Progress::new(1, 2), Metrics::default(), JsonValue::Null)
            .await
            .unwrap());
        assert!(!store.cancel_job(job_id).await.unwrap());

        assert_eq!(store.purge_expired(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_refresh_retention() {
        let store = store();
        let (job_id, _) = store.create_job(new_job()).await.unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        store.apply_status(job_id, JobStatus::Running, None).await.unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;

        assert!(store.get_job_state(job_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn side_data_round_trip() {
        let store = store();
        let (job_id, _) = store.create_job(new_job()).await.unwrap();

        store
            .set_job_data(job_id, "result", serde_json::json!([1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(
            store.get_job_data(job_id, "result").await.unwrap(),
            Some(serde_json::json!([1, 2, 3]))
        );
        assert!(store.get_job_data(job_id, "other").await.unwrap().is_none());
    }
}
