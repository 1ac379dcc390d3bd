use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::Script;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use jobstream_auth::generate_token;
use jobstream_core::{
    JobId, JobRecord, JobStatus, JobToken, Metrics, NewJob, Progress, TenantId,
};

use super::{cancel_key, data_key, state_key, ttl_secs};
use crate::state::{JobStateStore, StatusChange, StoreError};

/// KEYS[1] state hash
/// ARGV: new status, updated_at, ttl, total ("" = keep), allowed predecessors...
const APPLY_STATUS: &str = r#"
local current = redis.call('HGET', KEYS[1], 'status')
if not current then
  return {'missing', ''}
end
local allowed = false
for i = 5, #ARGV do
  if ARGV[i] == current then
    allowed = true
    break
  end
end
if not allowed then
  return {'rejected', current}
end
redis.call('HSET', KEYS[1], 'status', ARGV[1], 'updated_at', ARGV[2])
if ARGV[4] ~= '' then
  local total = tonumber(ARGV[4])
  local done = tonumber(redis.call('HGET', KEYS[1], 'done') or '0')
  local percent = 0
  if total > 0 then
    percent = math.floor(done * 100 / total)
  end
  redis.call('HSET', KEYS[1], 'total', ARGV[4], 'percent', percent)
end
redis.call('EXPIRE', KEYS[1], ARGV[3])
return {'applied', current}
"#;

/// KEYS[1] state hash
/// ARGV: ttl, then field/value pairs
const APPLY_PROGRESS: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
for i = 2, #ARGV, 2 do
  redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
end
redis.call('EXPIRE', KEYS[1], ARGV[1])
return 1
"#;

/// KEYS[1] state hash, KEYS[2] cancel flag
/// ARGV: ttl, updated_at
const CANCEL: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
local status = redis.call('HGET', KEYS[1], 'status')
if status == 'queued' or status == 'running' then
  redis.call('HSET', KEYS[1], 'status', 'cancelled', 'updated_at', ARGV[2])
end
redis.call('SET', KEYS[2], '1', 'EX', ARGV[1])
return 1
"#;

/// Job state in Redis hashes; guarded writes run as Lua scripts.
#[derive(Clone)]
pub struct RedisJobStateStore {
    conn: ConnectionManager,
    retention: Duration,
    apply_status: Script,
    apply_progress: Script,
    cancel: Script,
}

impl RedisJobStateStore {
    pub fn new(conn: ConnectionManager, retention: Duration) -> Self {
        Self {
            conn,
            retention,
            apply_status: Script::new(APPLY_STATUS),
            apply_progress: Script::new(APPLY_PROGRESS),
            cancel: Script::new(CANCEL),
        }
    }

    fn ttl(&self) -> u64 {
        ttl_secs(self.retention)
    }
}

fn json_text(value: &JsonValue) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Unavailable(format!("encode: {e}")))
}

/// Flatten a record into hash fields.
pub(crate) fn encode_record(record: &JobRecord) -> Result<Vec<(&'static str, String)>, StoreError> {
    let mut fields = vec![
        ("tenant_id", record.tenant_id.to_string()),
        ("job_type", record.job_type.clone()),
        ("status", record.status.as_str().to_string()),
        ("params", json_text(&record.params)?),
        ("done", record.progress.done.to_string()),
        ("total", record.progress.total.to_string()),
        ("percent", record.progress.percent.to_string()),
        ("success", record.metrics.success.to_string()),
        ("failed", record.metrics.failed.to_string()),
        ("retried", record.metrics.retried.to_string()),
        ("skipped", record.metrics.skipped.to_string()),
        ("current", json_text(&record.current)?),
        ("created_at", record.created_at.to_rfc3339()),
        ("updated_at", record.updated_at.to_rfc3339()),
        ("job_token", record.job_token.expose().to_string()),
    ];
    if let Some(session) = &record.session_qualifier {
        fields.push(("session_qualifier", session.clone()));
    }
    Ok(fields)
}

/// Rebuild a record from hash fields.
pub(crate) fn decode_record(job_id: JobId, map: &HashMap<String, String>) -> Result<JobRecord, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt { job_id, reason };
    let field = |name: &str| {
        map.get(name)
            .map(String::as_str)
            .ok_or_else(|| corrupt(format!("missing field {name}")))
    };
    let number = |name: &str| -> Result<u64, StoreError> {
        let raw = field(name)?;
        raw.parse().map_err(|_| corrupt(format!("bad number in {name}: {raw}")))
    };
    let json = |name: &str| -> Result<JsonValue, StoreError> {
        serde_json::from_str(field(name)?).map_err(|e| corrupt(format!("bad json in {name}: {e}")))
    };
    let time = |name: &str| -> Result<DateTime<Utc>, StoreError> {
        DateTime::parse_from_rfc3339(field(name)?)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| corrupt(format!("bad timestamp in {name}: {e}")))
    };

    let tenant_id = TenantId::parse(field("tenant_id")?).map_err(|e| corrupt(e.to_string()))?;
    let status: JobStatus = field("status")?.parse().map_err(|_| corrupt("bad status".to_string()))?;
    let done = number("done")?;
    let total = number("total")?;

    Ok(JobRecord {
        job_id,
        tenant_id,
        job_type: field("job_type")?.to_string(),
        status,
        params: json("params")?,
        progress: Progress::new(done, total),
        metrics: Metrics {
            success: number("success")?,
            failed: number("failed")?,
            retried: number("retried")?,
            skipped: number("skipped")?,
        },
        current: json("current")?,
        created_at: time("created_at")?,
        updated_at: time("updated_at")?,
        job_token: JobToken::new(field("job_token")?),
        session_qualifier: map.get("session_qualifier").cloned(),
    })
}

#[async_trait]
impl JobStateStore for RedisJobStateStore {
    #[instrument(skip(self, new), fields(tenant_id = %new.tenant_id, job_type = %new.job_type), err)]
    async fn create_job(&self, new: NewJob) -> Result<(JobId, JobToken), StoreError> {
        let job_id = JobId::new();
        let token = generate_token();
        let record = JobRecord::queued(job_id, token.clone(), new, Utc::now());
        let key = state_key(job_id);

        let mut conn = self.conn.clone();
        let () = redis::pipe()
            .atomic()
            .hset_multiple(&key, &encode_record(&record)?)
            .ignore()
            .expire(&key, self.ttl() as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(job_id = %job_id, "job created");
        Ok((job_id, token))
    }

    #[instrument(skip(self), err)]
    async fn get_job_state(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(state_key(job_id))
            .query_async(&mut conn)
            .await?;
        if map.is_empty() {
            return Ok(None);
        }
        decode_record(job_id, &map).map(Some)
    }

    #[instrument(skip(self), err)]
    async fn cancel_job(&self, job_id: JobId) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let found: i64 = self
            .cancel
            .key(state_key(job_id))
            .key(cancel_key(job_id))
            .arg(self.ttl())
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;
        Ok(found == 1)
    }

    async fn is_cancelled(&self, job_id: JobId) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(cancel_key(job_id))
            .query_async(&mut conn)
            .await?;
        Ok(exists)
    }

    #[instrument(skip(self), err)]
    async fn apply_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        total: Option<u64>,
    ) -> Result<StatusChange, StoreError> {
        let mut invocation = self.apply_status.key(state_key(job_id));
        invocation
            .arg(status.as_str())
            .arg(Utc::now().to_rfc3339())
            .arg(self.ttl())
            .arg(total.map(|t| t.to_string()).unwrap_or_default());
        for predecessor in JobStatus::allowed_predecessors(status) {
            invocation.arg(predecessor.as_str());
        }

        let mut conn = self.conn.clone();
        let (outcome, current): (String, String) = invocation.invoke_async(&mut conn).await?;
        let parse_current = || {
            current.parse::<JobStatus>().map_err(|_| StoreError::Corrupt {
                job_id,
                reason: format!("bad status {current}"),
            })
        };
        match outcome.as_str() {
            "applied" => Ok(StatusChange::Applied {
                previous: parse_current()?,
            }),
            "rejected" => Ok(StatusChange::Rejected {
                current: parse_current()?,
            }),
            _ => Ok(StatusChange::Missing),
        }
    }

    async fn apply_progress(
        &self,
        job_id: JobId,
        progress: Progress,
        metrics: Metrics,
        current: JsonValue,
    ) -> Result<bool, StoreError> {
        let mut invocation = self.apply_progress.key(state_key(job_id));
        invocation.arg(self.ttl());
        let fields = [
            ("done", progress.done.to_string()),
            ("total", progress.total.to_string()),
            ("percent", progress.percent.to_string()),
            ("success", metrics.success.to_string()),
            ("failed", metrics.failed.to_string()),
            ("retried", metrics.retried.to_string()),
            ("skipped", metrics.skipped.to_string()),
            ("current", json_text(&current)?),
            ("updated_at", Utc::now().to_rfc3339()),
        ];
        for (name, value) in &fields {
            invocation.arg(*name).arg(value);
        }

        let mut conn = self.conn.clone();
        let merged: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(merged == 1)
    }

    async fn set_job_data(&self, job_id: JobId, key: &str, value: JsonValue) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let () = redis::cmd("SET")
            .arg(data_key(job_id, key))
            .arg(json_text(&value)?)
            .arg("EX")
            .arg(self.ttl())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_job_data(&self, job_id: JobId, key: &str) -> Result<Option<JsonValue>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(data_key(job_id, key))
            .query_async(&mut conn)
            .await?;
        raw.map(|text| {
            serde_json::from_str(&text).map_err(|e| StoreError::Corrupt {
                job_id,
                reason: format!("bad json in data {key}: {e}"),
            })
        })
        .transpose()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_survives_hash_encoding() {
        let mut record = JobRecord::queued(
            JobId::new(),
            JobToken::new("abc123"),
            NewJob::new(TenantId::parse("store_a").unwrap(), "feed.generate", serde_json::json!({"limit": 5}))
                .with_session("sess-9"),
            Utc::now(),
        );
        record.progress = Progress::new(3, 12);
        record.metrics.retried = 2;

        let map: HashMap<String, String> = encode_record(&record)
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let decoded = decode_record(record.job_id, &map).unwrap();

        assert_eq!(decoded.progress, record.progress);
        assert_eq!(decoded.metrics, record.metrics);
        assert_eq!(decoded.session_qualifier.as_deref(), Some("sess-9"));
        assert_eq!(decoded.params, record.params);
        assert_eq!(decoded.job_token, record.job_token);
        assert_eq!(decoded.created_at.timestamp_millis(), record.created_at.timestamp_millis());
    }

    #[test]
    fn missing_fields_are_reported_as_corrupt() {
        let map = HashMap::from([("status".to_string(), "queued".to_string())]);
        assert!(matches!(
            decode_record(JobId::new(), &map),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
