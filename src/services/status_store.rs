use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::models::job::JobStatus;

const TOTAL_RESPONSE_TIME_KEY: &str = "total_response_time";
const TOTAL_REQUESTS_KEY: &str = "total_requests";

// Ranks mirror `JobStatus::rank`; terminal states are never overwritten.
const TRANSITION_SCRIPT: &str = r#"
local ranks = {['submitted']=0, ['ocr-in-progress']=1, ['translation-in-progress']=2, ['completed']=3, ['failed']=3}
local current = redis.call('HGET', KEYS[1], 'status')
if current then
  local rank = ranks[current] or 0
  if rank == 3 or ranks[ARGV[1]] < rank then
    return 0
  end
end
redis.call('HSET', KEYS[1], 'status', ARGV[1])
redis.call('HSETNX', KEYS[1], 'response_time_ms', 0)
return 1
"#;

const COMPLETE_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'status')
if current == 'completed' or current == 'failed' then
  return 0
end
redis.call('HSET', KEYS[1], 'status', 'completed', 'response_time_ms', ARGV[1])
redis.call('INCRBYFLOAT', KEYS[2], ARGV[2])
redis.call('INCR', KEYS[3])
return 1
"#;

/// Per-job record kept in the status store.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    pub status: JobStatus,
    pub response_time_ms: u64,
}

/// Process-wide completion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AggregateStats {
    pub total_response_time_secs: f64,
    pub total_requests: u64,
}

impl AggregateStats {
    /// Running average in seconds; zero before the first completion.
    pub fn average(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_response_time_secs / self.total_requests as f64
        }
    }
}

/// Key-value store of job status records and the aggregate counters.
///
/// Every write is a forward-only transition: a status is applied only when it
/// ranks at or above the current one and the current one is not terminal.
/// The boolean results report whether the write was applied.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn get(&self, job_id: &str) -> Result<Option<StatusRecord>, StoreError>;

    async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<bool, StoreError>;

    /// Terminal success: sets `completed` with the response time and bumps both
    /// counters in one atomic step. No-op on an already terminal job.
    async fn complete(&self, job_id: &str, response_time: Duration) -> Result<bool, StoreError>;

    async fn aggregate(&self) -> Result<AggregateStats, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;

    async fn get_status(&self, job_id: &str) -> Result<Option<JobStatus>, StoreError> {
        Ok(self.get(job_id).await?.map(|r| r.status))
    }
}

/// Redis-backed status store: one hash per job id plus two scalar counters.
pub struct RedisStatusStore {
    client: redis::Client,
    transition: redis::Script,
    completion: redis::Script,
}

impl RedisStatusStore {
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(StoreError::Redis)?;
        Ok(Self {
            client,
            transition: redis::Script::new(TRANSITION_SCRIPT),
            completion: redis::Script::new(COMPLETE_SCRIPT),
        })
    }

    /// Open the store and verify it answers within `timeout`.
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let store = Self::new(redis_url)?;
        tokio::time::timeout(timeout, store.health_check())
            .await
            .map_err(|_| StoreError::ConnectTimeout(timeout))??;
        Ok(store)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::Redis)
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn get(&self, job_id: &str) -> Result<Option<StatusRecord>, StoreError> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = conn.hgetall(job_id).await?;
        parse_record(job_id, &fields)
    }

    async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let applied: i32 = self
            .transition
            .key(job_id)
            .arg(status.as_ref())
            .invoke_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn complete(&self, job_id: &str, response_time: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let applied: i32 = self
            .completion
            .key(job_id)
            .key(TOTAL_RESPONSE_TIME_KEY)
            .key(TOTAL_REQUESTS_KEY)
            .arg(response_time.as_millis() as u64)
            .arg(response_time.as_secs_f64())
            .invoke_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn aggregate(&self) -> Result<AggregateStats, StoreError> {
        let mut conn = self.connection().await?;
        let total_time: Option<f64> = conn.get(TOTAL_RESPONSE_TIME_KEY).await?;
        let total_requests: Option<u64> = conn.get(TOTAL_REQUESTS_KEY).await?;
        Ok(AggregateStats {
            total_response_time_secs: total_time.unwrap_or(0.0),
            total_requests: total_requests.unwrap_or(0),
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(StoreError::Redis)?;
        Ok(())
    }
}

fn parse_record(
    job_id: &str,
    fields: &HashMap<String, String>,
) -> Result<Option<StatusRecord>, StoreError> {
    let Some(raw) = fields.get("status").filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let status = JobStatus::from_str(raw).map_err(|_| StoreError::Corrupt {
        job_id: job_id.to_string(),
        value: raw.clone(),
    })?;
    let response_time_ms = fields
        .get("response_time_ms")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    Ok(Some(StatusRecord {
        status,
        response_time_ms,
    }))
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, StatusRecord>,
    stats: AggregateStats,
}

/// In-process status store with the same transition rules as the Redis one.
#[derive(Default)]
pub struct InMemoryStatusStore {
    state: Mutex<MemoryState>,
    down: AtomicBool,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.down.store(!available, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn get(&self, job_id: &str) -> Result<Option<StatusRecord>, StoreError> {
        Ok(self.lock()?.records.get(job_id).cloned())
    }

    async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.records.get_mut(job_id) {
            Some(record) if !record.status.can_transition_to(status) => Ok(false),
            Some(record) => {
                record.status = status;
                Ok(true)
            }
            None => {
                state.records.insert(
                    job_id.to_string(),
                    StatusRecord {
                        status,
                        response_time_ms: 0,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn complete(&self, job_id: &str, response_time: Duration) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        if state
            .records
            .get(job_id)
            .is_some_and(|r| r.status.is_terminal())
        {
            return Ok(false);
        }
        state.records.insert(
            job_id.to_string(),
            StatusRecord {
                status: JobStatus::Completed,
                response_time_ms: response_time.as_millis() as u64,
            },
        );
        state.stats.total_response_time_secs += response_time.as_secs_f64();
        state.stats.total_requests += 1;
        Ok(true)
    }

    async fn aggregate(&self) -> Result<AggregateStats, StoreError> {
        Ok(self.lock()?.stats)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Unrecognized status {value:?} stored for job {job_id}")]
    Corrupt { job_id: String, value: String },

    #[error("Status store lock poisoned")]
    Poisoned,

    #[error("Status store unavailable")]
    Unavailable,

    #[error("Status store did not answer within {0:?}")]
    ConnectTimeout(Duration),
}
