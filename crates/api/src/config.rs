//! Process configuration read from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use jobstream_auth::TenantKeys;
use jobstream_infra::{Ceilings, JobRunnerConfig, StreamerConfig, DEFAULT_RETENTION};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid tenant keys: {0}")]
    TenantKeys(#[from] jobstream_auth::TenantKeysError),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub use_persistent_stores: bool,
    pub redis_url: String,
    /// Lifetime of job records, logs and limiter counters.
    pub retention: Duration,
    pub streamer: StreamerConfig,
    pub ceilings: Ceilings,
    pub runner: JobRunnerConfig,
    pub sweep_interval: Duration,
    pub tenant_keys: TenantKeys,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            use_persistent_stores: false,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            retention: DEFAULT_RETENTION,
            streamer: StreamerConfig::default(),
            ceilings: Ceilings::default(),
            runner: JobRunnerConfig::default(),
            sweep_interval: Duration::from_secs(3600),
            tenant_keys: TenantKeys::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset or unparsable values fall back
    /// to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let secs = |name: &str, default: Duration| {
            Duration::from_secs(parsed(name, var(name), default.as_secs()))
        };

        let mut streamer = defaults.streamer.clone();
        streamer.heartbeat = secs("SSE_HEARTBEAT_SECS", streamer.heartbeat);
        streamer.max_consecutive_errors = parsed(
            "SSE_MAX_CONSECUTIVE_ERRORS",
            var("SSE_MAX_CONSECUTIVE_ERRORS"),
            streamer.max_consecutive_errors,
        );

        let ceilings = Ceilings {
            jobs: parsed("MAX_CONCURRENT_JOBS", var("MAX_CONCURRENT_JOBS"), defaults.ceilings.jobs),
            uploads: parsed(
                "MAX_CONCURRENT_UPLOADS",
                var("MAX_CONCURRENT_UPLOADS"),
                defaults.ceilings.uploads,
            ),
            ..defaults.ceilings
        };

        let runner = defaults
            .runner
            .clone()
            .with_max_concurrent(parsed(
                "RUNNER_MAX_CONCURRENT",
                var("RUNNER_MAX_CONCURRENT"),
                defaults.runner.max_concurrent,
            ))
            .with_queue_capacity(parsed(
                "RUNNER_QUEUE_CAPACITY",
                var("RUNNER_QUEUE_CAPACITY"),
                defaults.runner.queue_capacity,
            ));

        // The file wins over the inline list.
        let mut tenant_keys = TenantKeys::new();
        if let Some(list) = var("TENANT_KEYS") {
            tenant_keys = tenant_keys.merge(TenantKeys::parse_list(&list)?);
        }
        if let Some(path) = var("TENANT_KEYS_FILE") {
            tenant_keys = tenant_keys.merge(TenantKeys::from_file(PathBuf::from(path))?);
        }
        if tenant_keys.is_empty() {
            warn!("no tenant keys configured; every tenant-key check will fail");
        }

        Ok(Self {
            bind_addr: parsed("BIND_ADDR", var("BIND_ADDR"), defaults.bind_addr),
            use_persistent_stores: parsed(
                "USE_PERSISTENT_STORES",
                var("USE_PERSISTENT_STORES"),
                defaults.use_persistent_stores,
            ),
            redis_url: var("REDIS_URL").unwrap_or(defaults.redis_url),
            retention: secs("JOB_RETENTION_SECS", defaults.retention),
            streamer,
            ceilings,
            runner,
            sweep_interval: secs("SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            tenant_keys,
        })
    }
}

fn parsed<T>(name: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + core::fmt::Debug,
{
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, fallback = ?default, "unparsable setting; using default");
            default
        }),
    }
}
