//! Job types built into the server.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use jobstream_core::{JobStatus, Metrics};
use jobstream_events::LogLevel;
use jobstream_infra::{JobContext, JobHandler, JobRunner, ProgressReport, UpstreamFailure};

pub const TICKER: &str = "ticker";

pub fn register_builtin_handlers(runner: &mut JobRunner) {
    runner.register_handler(TICKER, TickerHandler);
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct TickerParams {
    steps: u64,
    interval_ms: u64,
    /// Fail the job when this step is reached.
    fail_at: Option<u64>,
    /// Transient upstream failures to absorb (through the retry policy)
    /// before each step succeeds.
    flaky_attempts: u32,
}

impl Default for TickerParams {
    fn default() -> Self {
        Self {
            steps: 10,
            interval_ms: 200,
            fail_at: None,
            flaky_attempts: 0,
        }
    }
}

/// Diagnostic job: counts to `steps`, reporting progress at every step.
///
/// Useful for exercising the stream end to end without any upstream.
#[derive(Debug, Clone, Copy)]
pub struct TickerHandler;

#[async_trait]
impl JobHandler for TickerHandler {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()> {
        let params: TickerParams = serde_json::from_value(ctx.params.clone()).unwrap_or_else(|err| {
            tracing::debug!(job_id = %ctx.job_id, error = %err, "unreadable ticker params; using defaults");
            TickerParams::default()
        });
        let interval = Duration::from_millis(params.interval_ms);

        ctx.emit_status(JobStatus::Running, Some(params.steps)).await?;
        ctx.emit_log(LogLevel::Info, format!("ticking {} steps", params.steps), None)
            .await?;

        let mut metrics = Metrics::default();
        for step in 1..=params.steps {
            if ctx.cancel_check().await {
                ctx.emit_log(LogLevel::Warn, format!("stopped at step {step}"), None)
                    .await?;
                return Ok(());
            }
            if params.fail_at == Some(step) {
                anyhow::bail!("ticker failed at step {step}");
            }

            let failures_left = AtomicU32::new(params.flaky_attempts);
            let failures_left = &failures_left;
            ctx.retry
                .run_upstream(move || async move {
                    tokio::time::sleep(interval).await;
                    let left = failures_left.load(Ordering::SeqCst);
                    if left > 0 {
                        failures_left.store(left - 1, Ordering::SeqCst);
                        return Err(UpstreamFailure::status(503, "upstream busy"));
                    }
                    Ok(())
                })
                .await?;
            metrics.retried += u64::from(params.flaky_attempts);
            metrics.success += 1;

            ctx.emit_progress(
                ProgressReport::new(step, params.steps)
                    .with_metrics(metrics)
                    .with_current(json!({ "step": step })),
            )
            .await?;
        }

        ctx.put_data("summary", json!({ "steps": params.steps, "retried": metrics.retried }))
            .await?;
        ctx.emit_status(JobStatus::Done, None).await?;
        Ok(())
    }
}
