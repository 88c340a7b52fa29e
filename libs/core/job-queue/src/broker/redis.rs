//! Redis-backed broker.
//!
//! Key layout per queue (`hr:queue:<name>`):
//! - `:jobs`      HASH   job id -> job JSON for scheduled and active jobs
//! - `:wait`      ZSET   job ids scored by ready time (epoch ms)
//! - `:active`    ZSET   job ids held by a worker, scored by lease expiry (epoch ms)
//! - `:completed` STREAM completed jobs, trimmed to `retain_completed`
//! - `:failed`    STREAM dead-lettered jobs, trimmed to `retain_failed`
//!
//! Every state move is a single Lua script or `MULTI` block, so a job is
//! always in `:wait`, `:active` or one of the streams. A worker that dies
//! mid-attempt leaves its lease to lapse; `recover_stalled` then fails the
//! attempt through the normal retry path.
//!
//! The failed stream is the durable failed-job store: exhausted jobs stay
//! queryable (`failed_jobs`, or `XREVRANGE` from any Redis client) instead of
//! only showing up in logs.

use super::{Broker, BrokerConnector, JobCounts, STALLED_REASON};
use crate::error::QueueError;
use crate::job::{FailOutcome, Job, JobResult};
use crate::policy::{QueueConfig, QueueName};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

// Type alias for Redis stream entries
type StreamEntries = Vec<(String, Vec<(String, String)>)>;

const KEY_PREFIX: &str = "hr:queue";

/// Stalled jobs claimed per sweep
const RECOVER_BATCH: usize = 100;

/// KEYS: wait, jobs, active. ARGV: now, lease expiry.
/// Returns `{id, body}` or nil.
const RESERVE_SCRIPT: &str = r"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then
    return false
end
local id = ids[1]
redis.call('ZREM', KEYS[1], id)
local body = redis.call('HGET', KEYS[2], id)
if not body then
    return false
end
redis.call('ZADD', KEYS[3], ARGV[2], id)
return {id, body}
";

/// KEYS: active. ARGV: lease expiry, id. Returns 1 when the job was held.
const EXTEND_SCRIPT: &str = r"
if redis.call('ZSCORE', KEYS[1], ARGV[2]) then
    redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
    return 1
end
return 0
";

/// KEYS: active, jobs. ARGV: now, new lease expiry, batch size.
/// Re-leases lapsed jobs to the caller and returns `{id, body, id, body, ...}`.
const CLAIM_STALLED_SCRIPT: &str = r"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[3]))
local claimed = {}
for _, id in ipairs(ids) do
    local body = redis.call('HGET', KEYS[2], id)
    if body then
        redis.call('ZADD', KEYS[1], ARGV[2], id)
        table.insert(claimed, id)
        table.insert(claimed, body)
    else
        redis.call('ZREM', KEYS[1], id)
    end
end
return claimed
";

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Queue handle stored in Redis.
pub struct RedisBroker {
    redis: ConnectionManager,
    queue: QueueName,
    config: QueueConfig,
    closed: AtomicBool,
    jobs_key: String,
    wait_key: String,
    active_key: String,
    completed_key: String,
    failed_key: String,
    reserve_script: Script,
    extend_script: Script,
    claim_stalled_script: Script,
}

impl RedisBroker {
    pub fn new(redis: ConnectionManager, queue: QueueName, config: QueueConfig) -> Self {
        let base = format!("{}:{}", KEY_PREFIX, queue);
        Self {
            redis,
            queue,
            config,
            closed: AtomicBool::new(false),
            jobs_key: format!("{}:jobs", base),
            wait_key: format!("{}:wait", base),
            active_key: format!("{}:active", base),
            completed_key: format!("{}:completed", base),
            failed_key: format!("{}:failed", base),
            reserve_script: Script::new(RESERVE_SCRIPT),
            extend_script: Script::new(EXTEND_SCRIPT),
            claim_stalled_script: Script::new(CLAIM_STALLED_SCRIPT),
        }
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed(self.queue));
        }
        Ok(())
    }

    fn lease_until(&self) -> i64 {
        now_ms().saturating_add(millis(self.config.stall_timeout))
    }

    /// Store the job body and schedule it `delay` from now, releasing its
    /// lease if it holds one.
    async fn schedule(&self, job: &Job, delay: Duration) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let body = serde_json::to_string(job)?;
        let id = job.id.to_string();
        let ready_at = now_ms().saturating_add(millis(delay));

        let _: () = redis::pipe()
            .atomic()
            .zrem(&self.active_key, &id)
            .ignore()
            .hset(&self.jobs_key, &id, &body)
            .ignore()
            .zadd(&self.wait_key, &id, ready_at)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Append a finished job to a capped stream and drop its live state.
    async fn archive(&self, id: &str, body: &str, stream: &str, max_len: usize) -> Result<String, QueueError> {
        let mut conn = self.redis.clone();

        let (entry_id,): (String,) = redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(stream)
            .arg("MAXLEN")
            .arg(max_len)
            .arg("*")
            .arg("job")
            .arg(body)
            .zrem(&self.active_key, id)
            .ignore()
            .hdel(&self.jobs_key, id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(entry_id)
    }

    async fn archive_job(&self, job: &Job, stream: &str, max_len: usize) -> Result<String, QueueError> {
        let body = serde_json::to_string(job)?;
        self.archive(&job.id.to_string(), &body, stream, max_len).await
    }

    /// Decode a claimed body. An unreadable one is moved to the failed stream
    /// as-is so it is neither lost nor claimed again.
    async fn decode_claimed(&self, id: &str, body: &str) -> Result<Option<Job>, QueueError> {
        match serde_json::from_str::<Job>(body) {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                error!(queue = %self.queue, job_id = %id, error = %e, "Unreadable job body, moving to failed stream");
                self.archive(id, body, &self.failed_key, self.config.retain_failed)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn read_archive(&self, stream: &str, limit: usize) -> Result<Vec<Job>, QueueError> {
        let mut conn = self.redis.clone();
        let entries: StreamEntries = redis::cmd("XREVRANGE")
            .arg(stream)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::with_capacity(entries.len());
        for (entry_id, fields) in entries {
            if let Some(body) = fields.iter().find(|(k, _)| k == "job").map(|(_, v)| v) {
                match serde_json::from_str::<Job>(body) {
                    Ok(job) => jobs.push(job),
                    Err(e) => warn!(stream = %stream, entry_id = %entry_id, error = %e, "Skipping unreadable archived job"),
                }
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    fn queue(&self) -> QueueName {
        self.queue
    }

    fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn add(&self, job: Job) -> Result<Job, QueueError> {
        self.ensure_open()?;
        self.schedule(&job, job.options.initial_delay()).await?;
        debug!(queue = %self.queue, job_id = %job.id, delay_ms = job.options.delay, "Job added");
        Ok(job)
    }

    async fn reserve(&self) -> Result<Option<Job>, QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let mut conn = self.redis.clone();
        let claimed: Option<(String, String)> = self
            .reserve_script
            .key(&self.wait_key)
            .key(&self.jobs_key)
            .key(&self.active_key)
            .arg(now_ms())
            .arg(self.lease_until())
            .invoke_async(&mut conn)
            .await?;

        match claimed {
            Some((id, body)) => self.decode_claimed(&id, &body).await,
            None => Ok(None),
        }
    }

    async fn extend_lease(&self, job: &Job) -> Result<bool, QueueError> {
        let mut conn = self.redis.clone();
        let held: i64 = self
            .extend_script
            .key(&self.active_key)
            .arg(self.lease_until())
            .arg(job.id.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(held == 1)
    }

    async fn recover_stalled(&self) -> Result<Vec<(Job, FailOutcome)>, QueueError> {
        let mut conn = self.redis.clone();
        let claimed: Vec<String> = self
            .claim_stalled_script
            .key(&self.active_key)
            .key(&self.jobs_key)
            .arg(now_ms())
            .arg(self.lease_until())
            .arg(RECOVER_BATCH)
            .invoke_async(&mut conn)
            .await?;

        let mut recovered = Vec::new();
        for pair in claimed.chunks_exact(2) {
            let Some(mut job) = self.decode_claimed(&pair[0], &pair[1]).await? else {
                continue;
            };
            let outcome = self.fail(&mut job, STALLED_REASON).await?;
            warn!(queue = %self.queue, job_id = %job.id, attempts_made = job.attempts_made, "Recovered stalled job");
            recovered.push((job, outcome));
        }
        Ok(recovered)
    }

    async fn complete(&self, job: &mut Job, result: &JobResult) -> Result<(), QueueError> {
        job.record_completion(result);
        self.archive_job(job, &self.completed_key, self.config.retain_completed)
            .await?;
        Ok(())
    }

    async fn fail(&self, job: &mut Job, reason: &str) -> Result<FailOutcome, QueueError> {
        let outcome = job.record_failure(reason);

        match outcome {
            FailOutcome::Retrying { delay } => self.schedule(job, delay).await?,
            FailOutcome::DeadLettered => {
                let entry_id = self
                    .archive_job(job, &self.failed_key, self.config.retain_failed)
                    .await?;
                debug!(queue = %self.queue, job_id = %job.id, entry_id = %entry_id, "Job stored in failed stream");
            }
        }
        Ok(outcome)
    }

    async fn completed_jobs(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        self.read_archive(&self.completed_key, limit).await
    }

    async fn failed_jobs(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        self.read_archive(&self.failed_key, limit).await
    }

    async fn counts(&self) -> Result<JobCounts, QueueError> {
        let mut conn = self.redis.clone();
        let now = now_ms();

        let (waiting, delayed, active, completed, failed): (u64, u64, u64, u64, u64) = redis::pipe()
            .zcount(&self.wait_key, "-inf", now)
            .zcount(&self.wait_key, format!("({}", now), "+inf")
            .zcard(&self.active_key)
            .cmd("XLEN")
            .arg(&self.completed_key)
            .cmd("XLEN")
            .arg(&self.failed_key)
            .query_async(&mut conn)
            .await?;

        Ok(JobCounts {
            waiting,
            delayed,
            active,
            completed,
            failed,
        })
    }

    async fn close(&self) -> Result<(), QueueError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(queue = %self.queue, "Redis queue closed");
        }
        Ok(())
    }
}

/// Opens one managed Redis connection per queue.
#[derive(Clone)]
pub struct RedisConnector {
    client: Client,
    connect_timeout: Duration,
}

impl RedisConnector {
    pub fn new(uri: &str, connect_timeout: Duration) -> Result<Self, QueueError> {
        let client = Client::open(uri)?;
        Ok(Self {
            client,
            connect_timeout,
        })
    }
}

#[async_trait]
impl BrokerConnector for RedisConnector {
    async fn connect(
        &self,
        queue: QueueName,
        config: QueueConfig,
    ) -> Result<Arc<dyn Broker>, QueueError> {
        let connect = async {
            let mut conn = ConnectionManager::new(self.client.clone()).await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, QueueError>(conn)
        };

        let conn = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                QueueError::Connection(format!(
                    "timed out connecting {} after {:?}",
                    queue, self.connect_timeout
                ))
            })??;

        Ok(Arc::new(RedisBroker::new(conn, queue, config)))
    }
}
