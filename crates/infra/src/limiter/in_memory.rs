use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use jobstream_core::TenantId;

use super::{ConcurrencyLimiter, LimiterError, ResourceKind};
use crate::sweeper::Purgeable;

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: u32,
    expires_at: Instant,
}

/// In-memory limiter; every operation is one critical section.
#[derive(Debug)]
pub struct InMemoryConcurrencyLimiter {
    counters: Mutex<HashMap<(TenantId, ResourceKind), Counter>>,
    ttl: Duration,
}

impl InMemoryConcurrencyLimiter {
    pub fn new(ttl: Duration) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn locked<R>(
        &self,
        f: impl FnOnce(&mut HashMap<(TenantId, ResourceKind), Counter>, Instant) -> R,
    ) -> Result<R, LimiterError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| LimiterError::Unavailable("limiter lock poisoned".to_string()))?;
        Ok(f(&mut counters, Instant::now()))
    }
}

impl Default for InMemoryConcurrencyLimiter {
    fn default() -> Self {
        Self::new(crate::DEFAULT_RETENTION)
    }
}

fn live(counter: Option<&Counter>, now: Instant) -> u32 {
    counter.filter(|c| c.expires_at > now).map_or(0, |c| c.value)
}

#[async_trait]
impl ConcurrencyLimiter for InMemoryConcurrencyLimiter {
    async fn acquire(&self, tenant: &TenantId, resource: &ResourceKind, ceiling: u32) -> Result<u32, LimiterError> {
        let ttl = self.ttl;
        self.locked(|counters, now| {
            let key = (tenant.clone(), resource.clone());
            let value = live(counters.get(&key), now);
            if value >= ceiling {
                debug!(tenant_id = %tenant, resource = %resource, ceiling, "concurrency ceiling reached");
                return Err(LimiterError::RateLimited {
                    resource: resource.to_string(),
                    ceiling,
                });
            }
            counters.insert(
                key,
                Counter {
                    value: value + 1,
                    expires_at: now + ttl,
                },
            );
            Ok(value + 1)
        })?
    }

    async fn release(&self, tenant: &TenantId, resource: &ResourceKind) -> Result<u32, LimiterError> {
        self.locked(|counters, now| {
            let key = (tenant.clone(), resource.clone());
            let value = live(counters.get(&key), now).saturating_sub(1);
            match counters.get_mut(&key) {
                Some(counter) if value > 0 => counter.value = value,
                _ => {
                    counters.remove(&key);
                }
            }
            value
        })
    }

    async fn current(&self, tenant: &TenantId, resource: &ResourceKind) -> Result<u32, LimiterError> {
        self.locked(|counters, now| live(counters.get(&(tenant.clone(), resource.clone())), now))
    }
}

impl Purgeable for InMemoryConcurrencyLimiter {
    fn name(&self) -> &'static str {
        "limiter"
    }

    fn purge_expired(&self) -> usize {
        self.locked(|counters, now| {
            let before = counters.len();
            counters.retain(|_, c| c.expires_at > now);
            before - counters.len()
        })
        .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tenant(s: &str) -> TenantId {
        TenantId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn ceiling_is_enforced_per_tenant_and_resource() {
        let limiter = InMemoryConcurrencyLimiter::default();
        let a = tenant("store_a");
        let b = tenant("store_b");

        assert_eq!(limiter.acquire(&a, &ResourceKind::Jobs, 2).await.unwrap(), 1);
        assert_eq!(limiter.acquire(&a, &ResourceKind::Jobs, 2).await.unwrap(), 2);

        let err = limiter.acquire(&a, &ResourceKind::Jobs, 2).await.unwrap_err();
        assert_eq!(
            err,
            LimiterError::RateLimited {
                resource: "jobs".to_string(),
                ceiling: 2
            }
        );
        assert_eq!(err.to_string(), "too many concurrent jobs (limit 2)");

        // Rejection leaves the counter untouched.
        assert_eq!(limiter.current(&a, &ResourceKind::Jobs).await.unwrap(), 2);

        assert_eq!(limiter.acquire(&b, &ResourceKind::Jobs, 2).await.unwrap(), 1);
        assert_eq!(limiter.acquire(&a, &ResourceKind::Uploads, 3).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn release_frees_a_slot_and_clamps_at_zero() {
        let limiter = InMemoryConcurrencyLimiter::default();
        let a = tenant("store_a");

        limiter.acquire(&a, &ResourceKind::Jobs, 1).await.unwrap();
        assert!(limiter.acquire(&a, &ResourceKind::Jobs, 1).await.is_err());

        assert_eq!(limiter.release(&a, &ResourceKind::Jobs).await.unwrap(), 0);
        assert_eq!(limiter.release(&a, &ResourceKind::Jobs).await.unwrap(), 0);
        assert_eq!(limiter.acquire(&a, &ResourceKind::Jobs, 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn zero_ceiling_rejects_everything() {
        let limiter = InMemoryConcurrencyLimiter::default();
        let res = ResourceKind::Custom("exports".to_string());
        assert!(limiter.acquire(&tenant("store_a"), &res, 0).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn counters_expire_after_ttl() {
        let limiter = InMemoryConcurrencyLimiter::new(Duration::from_secs(30));
        let a = tenant("store_a");
        limiter.acquire(&a, &ResourceKind::Jobs, 1).await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(limiter.current(&a, &ResourceKind::Jobs).await.unwrap(), 0);
        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.acquire(&a, &ResourceKind::Jobs, 1).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquires_never_exceed_ceiling() {
        let limiter = Arc::new(InMemoryConcurrencyLimiter::default());
        let a = tenant("store_a");

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let limiter = limiter.clone();
            let a = a.clone();
            tasks.push(tokio::spawn(async move {
                limiter.acquire(&a, &ResourceKind::Jobs, 3).await.is_ok()
            }));
        }

        let mut granted = 0;
        for t in tasks {
            if t.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 3);
        assert_eq!(limiter.current(&a, &ResourceKind::Jobs).await.unwrap(), 3);
    }

    #[test]
    fn upload_job_types_draw_upload_slots() {
        assert_eq!(ResourceKind::for_job_type("upload.csv"), ResourceKind::Uploads);
        assert_eq!(ResourceKind::for_job_type("feed.generate"), ResourceKind::Jobs);
        assert_eq!(ResourceKind::for_job_type("uploader"), ResourceKind::Jobs);
    }
}
