use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::debug;

use jobstream_core::TenantId;

use super::{limit_key, ttl_secs};
use crate::limiter::{ConcurrencyLimiter, LimiterError, ResourceKind};

/// KEYS[1] counter; ARGV: ceiling, ttl. Returns the new count or -1.
const ACQUIRE: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= tonumber(ARGV[1]) then
  return -1
end
local value = redis.call('INCR', KEYS[1])
redis.call('EXPIRE', KEYS[1], ARGV[2])
return value
"#;

/// KEYS[1] counter. Returns the new count.
const RELEASE: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current <= 1 then
  redis.call('DEL', KEYS[1])
  return 0
end
return redis.call('DECR', KEYS[1])
"#;

/// Counters in plain Redis keys; check-and-increment runs as one script.
#[derive(Clone)]
pub struct RedisConcurrencyLimiter {
    conn: ConnectionManager,
    ttl: Duration,
    acquire: Script,
    release: Script,
}

impl RedisConcurrencyLimiter {
    pub fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self {
            conn,
            ttl,
            acquire: Script::new(ACQUIRE),
            release: Script::new(RELEASE),
        }
    }
}

fn count(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

#[async_trait]
impl ConcurrencyLimiter for RedisConcurrencyLimiter {
    async fn acquire(&self, tenant: &TenantId, resource: &ResourceKind, ceiling: u32) -> Result<u32, LimiterError> {
        let mut conn = self.conn.clone();
        let value: i64 = self
            .acquire
            .key(limit_key(tenant, resource))
            .arg(ceiling)
            .arg(ttl_secs(self.ttl))
            .invoke_async(&mut conn)
            .await?;
        if value < 0 {
            debug!(tenant_id = %tenant, resource = %resource, ceiling, "concurrency ceiling reached");
            return Err(LimiterError::RateLimited {
                resource: resource.to_string(),
                ceiling,
            });
        }
        Ok(count(value))
    }

    async fn release(&self, tenant: &TenantId, resource: &ResourceKind) -> Result<u32, LimiterError> {
        let mut conn = self.conn.clone();
        let value: i64 = self
            .release
            .key(limit_key(tenant, resource))
            .invoke_async(&mut conn)
            .await?;
        Ok(count(value))
    }

    async fn current(&self, tenant: &TenantId, resource: &ResourceKind) -> Result<u32, LimiterError> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = redis::cmd("GET")
            .arg(limit_key(tenant, resource))
            .query_async(&mut conn)
            .await?;
        Ok(count(value.unwrap_or(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_counts_clamp_to_zero() {
        assert_eq!(count(-1), 0);
        assert_eq!(count(3), 3);
    }
}
