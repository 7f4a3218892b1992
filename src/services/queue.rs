use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::job::{
    FailOutcome, ImportPayload, ImportResult, JobOptions, JobRecord, TransitionError,
};

/// Name of the queue all import jobs go through.
pub const QUEUE_NAME: &str = "image-import";

/// How many finished jobs to keep around for status polling.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub completed_count: usize,
    pub completed_age: Duration,
    pub failed_count: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed_count: 100,
            completed_age: Duration::from_secs(24 * 3600),
            failed_count: 500,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    /// How long a claim stays valid without a renewal or progress report
    /// before the job is considered stalled.
    pub lease: Duration,
    pub retention: RetentionPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(300),
            retention: RetentionPolicy::default(),
        }
    }
}

impl QueueSettings {
    /// How often a worker should renew its claim on a running job.
    pub fn lease_renew_interval(&self) -> Duration {
        self.lease / 2
    }
}

/// Number of jobs in each queue state.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Durable, at-least-once job queue.
///
/// A job is claimed by exactly one worker at a time; claims carry a lease that
/// is extended by progress reports and by [`JobQueue::extend_lease`]. Retries
/// and retention are owned here, not by the worker.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Readiness check against the backend.
    async fn ping(&self) -> Result<(), QueueError>;

    /// Add a job and return its id. Re-adding an existing id returns it unchanged.
    async fn enqueue(
        &self,
        name: &str,
        payload: ImportPayload,
        options: JobOptions,
    ) -> Result<String, QueueError>;

    /// Claim the next waiting job, promoting delayed jobs whose backoff elapsed.
    async fn dequeue(&self) -> Result<Option<JobRecord>, QueueError>;

    async fn update_progress(&self, job_id: &str, progress: u8) -> Result<(), QueueError>;

    /// Renew the claim on an active job without touching its progress.
    async fn extend_lease(&self, job_id: &str) -> Result<(), QueueError>;

    async fn complete(&self, job_id: &str, result: &ImportResult) -> Result<(), QueueError>;

    /// Record a failed attempt; the queue decides between retry and terminal failure.
    async fn fail(&self, job_id: &str, reason: &str) -> Result<FailOutcome, QueueError>;

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, QueueError>;

    /// Return active jobs with expired leases to the waiting list.
    async fn recover_stalled(&self) -> Result<usize, QueueError>;

    async fn counts(&self) -> Result<QueueCounts, QueueError>;
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Job not found: {0}")]
    NotFound(String),
}

struct Keys {
    prefix: String,
}

impl Keys {
    fn job(&self, id: &str) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    fn list(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }
}

/// Redis-backed [`JobQueue`].
///
/// Layout under `image_import:{queue}`: one JSON record per job, a `wait` list,
/// an `active` list (claimed with `RPOPLPUSH`), a `delayed` sorted set scored by
/// due time, and `completed`/`failed` sorted sets scored by finish time.
pub struct RedisJobQueue {
    conn: MultiplexedConnection,
    keys: Keys,
    settings: QueueSettings,
}

impl RedisJobQueue {
    /// Open a connection and wait until Redis answers `PING`.
    pub async fn connect(redis_url: &str, settings: QueueSettings) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;

        let queue = Self {
            conn,
            keys: Keys {
                prefix: format!("image_import:{QUEUE_NAME}"),
            },
            settings,
        };
        queue.ping().await?;
        Ok(queue)
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    async fn load(&self, job_id: &str) -> Result<Option<JobRecord>, QueueError> {
        let raw: Option<String> = self.conn().get(self.keys.job(job_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn load_existing(&self, job_id: &str) -> Result<JobRecord, QueueError> {
        self.load(job_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))
    }

    async fn save(&self, job: &JobRecord) -> Result<(), QueueError> {
        let json = serde_json::to_string(job)?;
        self.conn()
            .set::<_, _, ()>(self.keys.job(&job.id), json)
            .await?;
        Ok(())
    }

    /// Move delayed jobs whose backoff has elapsed back to the wait list.
    async fn promote_due(&self, now: DateTime<Utc>) -> Result<(), QueueError> {
        let mut conn = self.conn();
        let delayed = self.keys.list("delayed");
        let due: Vec<String> = conn
            .zrangebyscore(&delayed, "-inf", now.timestamp_millis())
            .await?;

        for id in due {
            // Only the caller that removes the entry promotes it.
            let removed: i64 = conn.zrem(&delayed, &id).await?;
            if removed == 0 {
                continue;
            }
            let Some(mut job) = self.load(&id).await? else {
                continue;
            };
            job.promote()?;
            self.save(&job).await?;
            conn.lpush::<_, _, ()>(self.keys.list("wait"), &id).await?;
            debug!(job_id = %id, "Promoted delayed job");
        }
        Ok(())
    }

    /// Drop finished jobs beyond the retention thresholds.
    async fn prune(
        &self,
        set: &str,
        max_count: usize,
        max_age: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let mut conn = self.conn();
        let key = self.keys.list(set);
        let mut expired: Vec<String> = Vec::new();

        if let Some(age) = max_age {
            let cutoff = now - ChronoDuration::from_std(age).unwrap_or(ChronoDuration::MAX);
            expired = conn
                .zrangebyscore(&key, "-inf", cutoff.timestamp_millis())
                .await?;
        }

        let total: usize = conn.zcard(&key).await?;
        let remaining = total.saturating_sub(expired.len());
        if remaining > max_count {
            let excess = remaining - max_count;
            let oldest: Vec<String> = conn
                .zrange(&key, expired.len() as isize, (expired.len() + excess) as isize - 1)
                .await?;
            expired.extend(oldest);
        }

        if expired.is_empty() {
            return Ok(());
        }

        let job_keys: Vec<String> = expired.iter().map(|id| self.keys.job(id)).collect();
        conn.del::<_, ()>(job_keys).await?;
        conn.zrem::<_, _, ()>(&key, &expired).await?;
        debug!(set, pruned = expired.len(), "Pruned finished jobs");
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn ping(&self) -> Result<(), QueueError> {
        redis::cmd("PING")
            .query_async::<String>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn enqueue(
        &self,
        name: &str,
        payload: ImportPayload,
        options: JobOptions,
    ) -> Result<String, QueueError> {
        let id = options
            .job_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let job = JobRecord::new(id.clone(), name, payload, &options, Utc::now());
        let json = serde_json::to_string(&job)?;

        let mut conn = self.conn();
        let created: Option<String> = redis::cmd("SET")
            .arg(self.keys.job(&id))
            .arg(json)
            .arg("NX")
            .query_async(&mut conn)
            .await?;

        if created.is_none() {
            info!(job_id = %id, "Job already exists, not enqueued again");
            return Ok(id);
        }

        conn.lpush::<_, _, ()>(self.keys.list("wait"), &id).await?;
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<JobRecord>, QueueError> {
        let now = Utc::now();
        self.promote_due(now).await?;

        let mut conn = self.conn();
        loop {
            let id: Option<String> = conn
                .rpoplpush(self.keys.list("wait"), self.keys.list("active"))
                .await?;
            let Some(id) = id else {
                return Ok(None);
            };

            let Some(mut job) = self.load(&id).await? else {
                warn!(job_id = %id, "Claimed job has no record, discarding");
                conn.lrem::<_, _, ()>(self.keys.list("active"), 1, &id).await?;
                continue;
            };

            if let Err(e) = job.claim(now, self.settings.lease) {
                warn!(job_id = %id, error = %e, "Claimed job is not waiting, discarding");
                conn.lrem::<_, _, ()>(self.keys.list("active"), 1, &id).await?;
                continue;
            }
            self.save(&job).await?;
            return Ok(Some(job));
        }
    }

    async fn update_progress(&self, job_id: &str, progress: u8) -> Result<(), QueueError> {
        let mut job = self.load_existing(job_id).await?;
        job.report_progress(progress, Utc::now(), self.settings.lease)?;
        self.save(&job).await
    }

    async fn extend_lease(&self, job_id: &str) -> Result<(), QueueError> {
        let mut job = self.load_existing(job_id).await?;
        job.extend_lease(Utc::now(), self.settings.lease)?;
        self.save(&job).await
    }

    async fn complete(&self, job_id: &str, result: &ImportResult) -> Result<(), QueueError> {
        let now = Utc::now();
        let mut job = self.load_existing(job_id).await?;
        job.complete(result.clone(), now)?;
        self.save(&job).await?;

        let mut conn = self.conn();
        conn.lrem::<_, _, ()>(self.keys.list("active"), 1, job_id).await?;
        conn.zadd::<_, _, _, ()>(self.keys.list("completed"), job_id, now.timestamp_millis())
            .await?;

        let retention = self.settings.retention;
        self.prune(
            "completed",
            retention.completed_count,
            Some(retention.completed_age),
            now,
        )
        .await
    }

    async fn fail(&self, job_id: &str, reason: &str) -> Result<FailOutcome, QueueError> {
        let now = Utc::now();
        let mut job = self.load_existing(job_id).await?;
        let outcome = job.fail(reason, now)?;
        self.save(&job).await?;

        let mut conn = self.conn();
        conn.lrem::<_, _, ()>(self.keys.list("active"), 1, job_id).await?;

        match outcome {
            FailOutcome::Retry { .. } => {
                let due = job.delay_until.unwrap_or(now).timestamp_millis();
                conn.zadd::<_, _, _, ()>(self.keys.list("delayed"), job_id, due)
                    .await?;
            }
            FailOutcome::Failed => {
                conn.zadd::<_, _, _, ()>(self.keys.list("failed"), job_id, now.timestamp_millis())
                    .await?;
                self.prune("failed", self.settings.retention.failed_count, None, now)
                    .await?;
            }
        }
        Ok(outcome)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, QueueError> {
        self.load(job_id).await
    }

    async fn recover_stalled(&self) -> Result<usize, QueueError> {
        let now = Utc::now();
        let mut conn = self.conn();
        let active_key = self.keys.list("active");
        let active: Vec<String> = conn.lrange(&active_key, 0, -1).await?;

        let mut recovered = 0;
        for id in active {
            let Some(mut job) = self.load(&id).await? else {
                conn.lrem::<_, _, ()>(&active_key, 1, &id).await?;
                continue;
            };
            if !job.lease_expired(now) {
                continue;
            }
            let removed: i64 = conn.lrem(&active_key, 1, &id).await?;
            if removed == 0 {
                continue;
            }
            job.requeue_stalled()?;
            self.save(&job).await?;
            conn.lpush::<_, _, ()>(self.keys.list("wait"), &id).await?;
            warn!(job_id = %id, "Recovered stalled job");
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let mut conn = self.conn();
        Ok(QueueCounts {
            waiting: conn.llen(self.keys.list("wait")).await?,
            active: conn.llen(self.keys.list("active")).await?,
            delayed: conn.zcard(self.keys.list("delayed")).await?,
            completed: conn.zcard(self.keys.list("completed")).await?,
            failed: conn.zcard(self.keys.list("failed")).await?,
        })
    }
}
