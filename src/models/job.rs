use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumString};

/// Default number of execution attempts before a job is marked failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential retry backoff.
pub const DEFAULT_BACKOFF_MS: u64 = 5_000;

/// Upper bound for a single backoff delay.
pub const MAX_BACKOFF_MS: u64 = 10 * 60 * 1_000;

/// State of an import job as seen by the queue backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Waiting,
    /// Waiting out a retry backoff.
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Immutable job payload for a folder import.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportPayload {
    pub folder_id: String,
    pub source: String,
    pub requested_at: DateTime<Utc>,
}

/// Exponential backoff between attempts: `base * 2^(n-1)`, capped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BACKOFF_MS,
            max_delay_ms: MAX_BACKOFF_MS,
        }
    }
}

impl BackoffPolicy {
    pub fn exponential(base_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            ..Self::default()
        }
    }

    /// Delay before the next attempt, given how many attempts have failed so far.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(32);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Options recognised by [`crate::services::queue::JobQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Becomes the job id. Enqueueing an id that already exists is a no-op.
    pub job_id: Option<String>,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            job_id: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Terminal result of a folder import.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    pub total: u32,
    pub processed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub message: String,
}

impl ImportResult {
    pub fn empty_folder() -> Self {
        Self {
            success: true,
            total: 0,
            processed: 0,
            failed: 0,
            skipped: 0,
            message: "No images found in folder".to_string(),
        }
    }
}

/// What the queue decided after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Rescheduled; becomes available again after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Attempt budget exhausted; the job is terminally failed.
    Failed,
}

#[derive(Debug, thiserror::Error)]
#[error("job {job_id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub job_id: String,
    pub from: JobState,
    pub to: JobState,
}

/// Full queue-side record of a job. Both queue backends persist this record and
/// drive it through the transitions below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub name: String,
    pub payload: ImportPayload,
    pub state: JobState,
    pub progress: u8,
    pub result: Option<ImportResult>,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub delay_until: Option<DateTime<Utc>>,
    pub lease_until: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(
        id: String,
        name: &str,
        payload: ImportPayload,
        options: &JobOptions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            payload,
            state: JobState::Waiting,
            progress: 0,
            result: None,
            attempts_made: 0,
            max_attempts: options.max_attempts.max(1),
            backoff: options.backoff,
            created_at: now,
            processed_at: None,
            finished_at: None,
            failed_reason: None,
            delay_until: None,
            lease_until: None,
        }
    }

    fn ensure(&self, expected: JobState, to: JobState) -> Result<(), TransitionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TransitionError {
                job_id: self.id.clone(),
                from: self.state,
                to,
            })
        }
    }

    /// Hand the job to a worker until `now + lease`.
    pub fn claim(&mut self, now: DateTime<Utc>, lease: Duration) -> Result<(), TransitionError> {
        self.ensure(JobState::Waiting, JobState::Active)?;
        self.state = JobState::Active;
        self.processed_at = Some(now);
        self.lease_until = Some(now + to_chrono(lease));
        Ok(())
    }

    /// Record progress and extend the lease. Progress never moves backwards.
    pub fn report_progress(
        &mut self,
        progress: u8,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<(), TransitionError> {
        self.extend_lease(now, lease)?;
        self.progress = self.progress.max(progress.min(100));
        Ok(())
    }

    /// Keep an active claim alive until `now + lease`.
    pub fn extend_lease(&mut self, now: DateTime<Utc>, lease: Duration) -> Result<(), TransitionError> {
        self.ensure(JobState::Active, JobState::Active)?;
        self.lease_until = Some(now + to_chrono(lease));
        Ok(())
    }

    pub fn complete(
        &mut self,
        result: ImportResult,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure(JobState::Active, JobState::Completed)?;
        self.state = JobState::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.finished_at = Some(now);
        self.lease_until = None;
        self.attempts_made += 1;
        Ok(())
    }

    /// Consume one attempt. Either schedules a retry with backoff or fails the job.
    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> Result<FailOutcome, TransitionError> {
        self.ensure(JobState::Active, JobState::Failed)?;
        self.attempts_made += 1;
        self.failed_reason = Some(reason.to_string());
        self.lease_until = None;

        if self.attempts_made >= self.max_attempts {
            self.state = JobState::Failed;
            self.finished_at = Some(now);
            return Ok(FailOutcome::Failed);
        }

        let delay = self.backoff.delay_for(self.attempts_made);
        self.state = JobState::Delayed;
        self.delay_until = Some(now + to_chrono(delay));
        Ok(FailOutcome::Retry {
            attempt: self.attempts_made,
            delay,
        })
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Delayed && self.delay_until.map_or(true, |at| at <= now)
    }

    /// Move a delayed job back to waiting once its backoff has elapsed.
    pub fn promote(&mut self) -> Result<(), TransitionError> {
        self.ensure(JobState::Delayed, JobState::Waiting)?;
        self.state = JobState::Waiting;
        self.delay_until = None;
        Ok(())
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Active && self.lease_until.is_some_and(|at| at <= now)
    }

    /// Return an active job whose worker disappeared to the waiting list.
    pub fn requeue_stalled(&mut self) -> Result<(), TransitionError> {
        self.ensure(JobState::Active, JobState::Waiting)?;
        self.state = JobState::Waiting;
        self.lease_until = None;
        Ok(())
    }
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}

/// Read-only projection of a job for external pollers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
    pub progress: u8,
    pub data: ImportPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ImportResult>,
    pub attempts_made: u32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
}

impl From<&JobRecord> for JobStatus {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.id.clone(),
            state: job.state,
            progress: job.progress,
            data: job.payload.clone(),
            result: if job.state.is_terminal() {
                job.result.clone()
            } else {
                None
            },
            attempts_made: job.attempts_made,
            created_at: job.created_at,
            processed_at: job.processed_at,
            finished_at: job.finished_at,
            failed_reason: job.failed_reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> ImportPayload {
        ImportPayload {
            folder_id: "folder-1".to_string(),
            source: "google_drive".to_string(),
            requested_at: Utc::now(),
        }
    }

    fn job(max_attempts: u32) -> JobRecord {
        let options = JobOptions {
            max_attempts,
            backoff: BackoffPolicy::exponential(1_000),
            ..JobOptions::default()
        };
        JobRecord::new("job-1".to_string(), "import-drive-folder", payload(), &options, Utc::now())
    }

    const LEASE: Duration = Duration::from_secs(60);

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = BackoffPolicy {
            base_delay_ms: 5_000,
            max_delay_ms: 15_000,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(5_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(15_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(15_000));
    }

    #[test]
    fn test_fail_retries_until_budget_exhausted() {
        let mut job = job(3);
        let now = Utc::now();

        job.claim(now, LEASE).unwrap();
        assert_eq!(
            job.fail("boom", now).unwrap(),
            FailOutcome::Retry {
                attempt: 1,
                delay: Duration::from_millis(1_000)
            }
        );
        assert_eq!(job.state, JobState::Delayed);
        assert!(!job.is_due(now));
        assert!(job.is_due(now + ChronoDuration::seconds(1)));

        job.promote().unwrap();
        job.claim(now, LEASE).unwrap();
        assert!(matches!(job.fail("boom", now).unwrap(), FailOutcome::Retry { attempt: 2, .. }));

        job.promote().unwrap();
        job.claim(now, LEASE).unwrap();
        assert_eq!(job.fail("still broken", now).unwrap(), FailOutcome::Failed);
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failed_reason.as_deref(), Some("still broken"));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_terminal_state_is_immutable() {
        let mut job = job(3);
        let now = Utc::now();
        job.claim(now, LEASE).unwrap();
        job.complete(ImportResult::empty_folder(), now).unwrap();

        assert!(job.fail("late failure", now).is_err());
        assert!(job.complete(ImportResult::empty_folder(), now).is_err());
        assert!(job.claim(now, LEASE).is_err());
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = job(3);
        let now = Utc::now();
        job.claim(now, LEASE).unwrap();

        job.report_progress(40, now, LEASE).unwrap();
        job.report_progress(10, now, LEASE).unwrap();
        assert_eq!(job.progress, 40);

        job.report_progress(250, now, LEASE).unwrap();
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_lease_expiry_and_requeue() {
        let mut job = job(3);
        let now = Utc::now();
        job.claim(now, LEASE).unwrap();

        assert!(!job.lease_expired(now));
        assert!(job.lease_expired(now + ChronoDuration::seconds(61)));

        job.requeue_stalled().unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.lease_until, None);
    }

    #[test]
    fn test_extend_lease_only_for_active_jobs() {
        let mut job = job(3);
        let now = Utc::now();
        assert!(job.extend_lease(now, LEASE).is_err());

        job.claim(now, LEASE).unwrap();
        let later = now + ChronoDuration::seconds(50);
        job.extend_lease(later, LEASE).unwrap();
        assert!(!job.lease_expired(now + ChronoDuration::seconds(61)));
        assert!(job.lease_expired(later + ChronoDuration::seconds(60)));
        assert_eq!(job.progress, 0);
    }

    #[test]
    fn test_status_hides_result_until_terminal() {
        let mut job = job(3);
        job.result = Some(ImportResult::empty_folder());
        let status = JobStatus::from(&job);
        assert!(status.result.is_none());

        let serialized = serde_json::to_value(&status).unwrap();
        assert_eq!(serialized["state"], "waiting");
        assert_eq!(serialized["data"]["folderId"], "folder-1");
    }
}
