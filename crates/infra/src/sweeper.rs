//! Periodic cleanup of expired in-memory entries.
//!
//! Redis-backed stores rely on key TTLs and need no sweeping.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A store holding entries with an expiry.
pub trait Purgeable: Send + Sync {
    fn name(&self) -> &'static str;

    /// Drop expired entries; returns how many were removed.
    fn purge_expired(&self) -> usize;
}

/// Background task calling `purge_expired` on every target at a fixed interval.
#[derive(Debug)]
pub struct RetentionSweeper {
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RetentionSweeper {
    pub fn spawn(interval: Duration, targets: Vec<Arc<dyn Purgeable>>) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {
                        let removed = sweep(&targets);
                        if removed > 0 {
                            info!(removed, "retention sweep");
                        }
                    }
                }
            }
        });
        Self { stop, join }
    }

    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.join.await;
    }
}

/// One pass over `targets`.
pub fn sweep(targets: &[Arc<dyn Purgeable>]) -> usize {
    targets
        .iter()
        .map(|t| {
            let n = t.purge_expired();
            debug!(target_store = t.name(), removed = n, "purged");
            n
        })
        .sum()
}
