//! In-process [`JobQueue`] with the same state machine as the Redis backend.
//!
//! Jobs do not survive a restart. Used for single-process runs and tests.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::warn;

use super::queue::{JobQueue, QueueCounts, QueueError, QueueSettings};
use crate::models::job::{FailOutcome, ImportPayload, ImportResult, JobOptions, JobRecord};

#[derive(Default)]
struct State {
    jobs: HashMap<String, JobRecord>,
    wait: VecDeque<String>,
    active: Vec<String>,
    delayed: Vec<String>,
    /// Finish order, oldest first.
    completed: VecDeque<String>,
    failed: VecDeque<String>,
}

impl State {
    fn job_mut(&mut self, job_id: &str) -> Result<&mut JobRecord, QueueError> {
        self.jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))
    }

    fn remove_active(&mut self, job_id: &str) {
        self.active.retain(|id| id != job_id);
    }

    fn drop_oldest(&mut self, from_completed: bool) {
        let list = if from_completed {
            &mut self.completed
        } else {
            &mut self.failed
        };
        if let Some(id) = list.pop_front() {
            self.jobs.remove(&id);
        }
    }
}

pub struct MemoryJobQueue {
    state: Mutex<State>,
    settings: QueueSettings,
}

impl MemoryJobQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            state: Mutex::new(State::default()),
            settings,
        }
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(QueueSettings::default())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn ping(&self) -> Result<(), QueueError> {
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

        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&id) {
            return Ok(id);
        }
        let job = JobRecord::new(id.clone(), name, payload, &options, Utc::now());
        state.jobs.insert(id.clone(), job);
        state.wait.push_back(id.clone());
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<JobRecord>, QueueError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let due: Vec<String> = state
            .delayed
            .iter()
            .filter(|id| state.jobs.get(*id).is_some_and(|job| job.is_due(now)))
            .cloned()
            .collect();
        for id in due {
            state.delayed.retain(|d| d != &id);
            state.job_mut(&id)?.promote()?;
            state.wait.push_back(id);
        }

        while let Some(id) = state.wait.pop_front() {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            if let Err(e) = job.claim(now, self.settings.lease) {
                warn!(job_id = %id, error = %e, "Queued job is not waiting, discarding");
                continue;
            }
            let claimed = job.clone();
            state.active.push(id);
            return Ok(Some(claimed));
        }
        Ok(None)
    }

    async fn update_progress(&self, job_id: &str, progress: u8) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state
            .job_mut(job_id)?
            .report_progress(progress, Utc::now(), self.settings.lease)?;
        Ok(())
    }

    async fn extend_lease(&self, job_id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state
            .job_mut(job_id)?
            .extend_lease(Utc::now(), self.settings.lease)?;
        Ok(())
    }

    async fn complete(&self, job_id: &str, result: &ImportResult) -> Result<(), QueueError> {
        let now = Utc::now();
        let retention = self.settings.retention;
        let mut state = self.state.lock().await;

        state.job_mut(job_id)?.complete(result.clone(), now)?;
        state.remove_active(job_id);
        state.completed.push_back(job_id.to_string());

        let cutoff = now
            - ChronoDuration::from_std(retention.completed_age).unwrap_or(ChronoDuration::MAX);
        while let Some(oldest) = state.completed.front() {
            let expired = state
                .jobs
                .get(oldest)
                .and_then(|job| job.finished_at)
                .map_or(true, |at| at < cutoff);
            if !expired && state.completed.len() <= retention.completed_count {
                break;
            }
            state.drop_oldest(true);
        }
        Ok(())
    }

    async fn fail(&self, job_id: &str, reason: &str) -> Result<FailOutcome, QueueError> {
        let mut state = self.state.lock().await;
        let outcome = state.job_mut(job_id)?.fail(reason, Utc::now())?;
        state.remove_active(job_id);

        match outcome {
            FailOutcome::Retry { .. } => state.delayed.push(job_id.to_string()),
            FailOutcome::Failed => {
                state.failed.push_back(job_id.to_string());
                while state.failed.len() > self.settings.retention.failed_count {
                    state.drop_oldest(false);
                }
            }
        }
        Ok(outcome)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, QueueError> {
        Ok(self.state.lock().await.jobs.get(job_id).cloned())
    }

    async fn recover_stalled(&self) -> Result<usize, QueueError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let stalled: Vec<String> = state
            .active
            .iter()
            .filter(|id| state.jobs.get(*id).is_some_and(|job| job.lease_expired(now)))
            .cloned()
            .collect();
        for id in &stalled {
            state.remove_active(id);
            state.job_mut(id)?.requeue_stalled()?;
            state.wait.push_back(id.clone());
        }
        Ok(stalled.len())
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let state = self.state.lock().await;
        Ok(QueueCounts {
            waiting: state.wait.len() as u64,
            active: state.active.len() as u64,
            delayed: state.delayed.len() as u64,
            completed: state.completed.len() as u64,
            failed: state.failed.len() as u64,
        })
    }
}
