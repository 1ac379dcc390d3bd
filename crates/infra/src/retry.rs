//! Retry with exponential backoff for calls to slow or flaky upstreams.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use jobstream_core::CoreError;

/// HTTP statuses worth retrying: throttling and gateway/server hiccups.
const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = try once).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied per retry (1.0 = fixed delay).
    pub backoff_factor: f64,
    /// Cap applied before jitter.
    pub max_delay: Duration,
    /// Uniform random extra delay in `[0, jitter)`.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            backoff_factor: 1.0,
            max_delay: delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn exponential(max_retries: u32, initial_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            initial_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry `retry` (0-based), without jitter:
    /// `min(initial_delay * backoff_factor^retry, max_delay)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = self.backoff_factor.max(0.0);
        let exp = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else if capped.is_nan() || capped <= 0.0 {
            Duration::ZERO
        } else {
            self.max_delay
        }
    }

    fn jittered(&self, retry: u32) -> Duration {
        let base = self.delay_for_retry(retry);
        if self.jitter.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..self.jitter.as_secs_f64());
        base + Duration::from_secs_f64(extra)
    }
}

/// Failed call to an upstream service.
///
/// `status` is `None` when no response came back (connect error, timeout).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("upstream call failed (status {status:?}): {message}")]
pub struct UpstreamFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl UpstreamFailure {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        match self.status {
            None => true,
            Some(status) => TRANSIENT_STATUSES.contains(&status),
        }
    }
}

impl From<UpstreamFailure> for CoreError {
    fn from(err: UpstreamFailure) -> Self {
        CoreError::TransientUpstream(err.to_string())
    }
}

/// Runs an async operation under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Statuses [`UpstreamFailure::is_transient`] treats as retryable.
    pub fn transient_statuses() -> &'static [u16] {
        &TRANSIENT_STATUSES
    }

    /// Call `operation` until it succeeds, fails with a non-retryable error, or
    /// the retry budget is spent.
    ///
    /// Non-retryable errors return immediately without sleeping. When retries
    /// run out the last error is returned unchanged.
    pub async fn run<T, E, F, Fut, R>(&self, mut operation: F, is_retryable: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: core::fmt::Display,
    {
        let mut retry = 0u32;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !is_retryable(&err) {
                return Err(err);
            }
            if retry >= self.policy.max_retries {
                warn!(attempts = retry + 1, error = %err, "retries exhausted");
                return Err(err);
            }

            let delay = self.policy.jittered(retry);
            debug!(retry = retry + 1, delay_ms = delay.as_millis() as u64, error = %err, "retrying after backoff");
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    /// [`run`](Self::run) for upstream calls: retries transient statuses and
    /// connection failures.
    pub async fn run_upstream<T, F, Fut>(&self, operation: F) -> Result<T, UpstreamFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamFailure>>,
    {
        self.run(operation, UpstreamFailure::is_transient).await
    }
}
