//! Store and worker wiring shared by every route.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use jobstream_infra::{
    AccessGate, Ceilings, ConcurrencyLimiter, EventLog, EventStreamer, InMemoryConcurrencyLimiter,
    InMemoryEventLog, InMemoryJobStateStore, JobRunner, JobRunnerHandle, JobStateStore, Purgeable,
    RetentionSweeper,
};

use crate::app::jobs;
use crate::config::AppConfig;

/// Which backing store the process runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    InMemory,
    Redis,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::InMemory => "memory",
            Backend::Redis => "redis",
        }
    }
}

pub struct AppServices {
    pub backend: Backend,
    pub state: Arc<dyn JobStateStore>,
    pub log: Arc<dyn EventLog>,
    pub limiter: Arc<dyn ConcurrencyLimiter>,
    pub ceilings: Ceilings,
    pub gate: AccessGate,
    pub streamer: EventStreamer,
    pub runner: JobRunnerHandle,
    sweeper: Mutex<Option<RetentionSweeper>>,
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices")
            .field("backend", &self.backend)
            .field("ceilings", &self.ceilings)
            .finish_non_exhaustive()
    }
}

impl AppServices {
    /// Stop the sweeper and drain the runner.
    pub async fn shutdown(&self) {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
        self.runner.shutdown().await;
        info!("services stopped");
    }
}

struct Stores {
    backend: Backend,
    state: Arc<dyn JobStateStore>,
    log: Arc<dyn EventLog>,
    limiter: Arc<dyn ConcurrencyLimiter>,
    /// In-memory stores needing periodic expiry.
    purgeable: Vec<Arc<dyn Purgeable>>,
}

fn in_memory_stores(config: &AppConfig) -> Stores {
    let state = Arc::new(InMemoryJobStateStore::new(config.retention));
    let log = Arc::new(InMemoryEventLog::new(config.retention));
    let limiter = Arc::new(InMemoryConcurrencyLimiter::new(config.retention));
    Stores {
        backend: Backend::InMemory,
        purgeable: vec![
            state.clone() as Arc<dyn Purgeable>,
            log.clone() as Arc<dyn Purgeable>,
            limiter.clone() as Arc<dyn Purgeable>,
        ],
        state,
        log,
        limiter,
    }
}

#[cfg(feature = "redis")]
async fn redis_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    let backend = jobstream_infra::redis_backend::RedisBackend::connect(&config.redis_url).await?;
    Ok(Stores {
        backend: Backend::Redis,
        state: Arc::new(backend.state_store(config.retention)),
        log: Arc::new(backend.event_log(config.retention)),
        limiter: Arc::new(backend.limiter(config.retention)),
        purgeable: Vec::new(),
    })
}

async fn build_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    if !config.use_persistent_stores {
        return Ok(in_memory_stores(config));
    }

    #[cfg(feature = "redis")]
    {
        redis_stores(config).await
    }
    #[cfg(not(feature = "redis"))]
    {
        tracing::warn!("USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory");
        Ok(in_memory_stores(config))
    }
}

/// Build stores, the access gate, the streamer and a running job runner.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let stores = build_stores(config).await?;

    let mut runner = JobRunner::new(stores.state.clone(), stores.log.clone(), stores.limiter.clone());
    jobs::register_builtin_handlers(&mut runner);
    let patterns = runner.patterns();
    let runner = runner.spawn(config.runner.clone());

    let sweeper = if stores.purgeable.is_empty() {
        None
    } else {
        Some(RetentionSweeper::spawn(config.sweep_interval, stores.purgeable))
    };

    let gate = AccessGate::new(stores.state.clone(), Arc::new(config.tenant_keys.clone()));
    let streamer = EventStreamer::new(stores.state.clone(), stores.log.clone(), config.streamer.clone());

    info!(
        backend = stores.backend.as_str(),
        job_types = ?patterns,
        tenants = config.tenant_keys.len(),
        "services ready"
    );

    Ok(AppServices {
        backend: stores.backend,
        state: stores.state,
        log: stores.log,
        limiter: stores.limiter,
        ceilings: config.ceilings,
        gate,
        streamer,
        runner,
        sweeper: Mutex::new(sweeper),
    })
}
