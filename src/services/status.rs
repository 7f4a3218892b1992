use std::sync::Arc;

use super::queue::{JobQueue, QueueError};
use crate::models::job::JobStatus;

/// Read-only view of job state for pollers.
pub struct JobStatusService {
    queue: Arc<dyn JobQueue>,
}

impl JobStatusService {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// `Ok(None)` for unknown or already pruned jobs.
    pub async fn get_status(&self, job_id: &str) -> Result<Option<JobStatus>, QueueError> {
        let job = self.queue.get_job(job_id).await?;
        Ok(job.as_ref().map(JobStatus::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{ImportPayload, ImportResult, JobOptions, JobState};
    use crate::services::memory_queue::MemoryJobQueue;
    use chrono::Utc;

    #[tokio::test]
    async fn test_unknown_job_is_none() {
        let service = JobStatusService::new(Arc::new(MemoryJobQueue::default()));
        assert!(service.get_status("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_follows_job_lifecycle() {
        let queue = Arc::new(MemoryJobQueue::default());
        let service = JobStatusService::new(queue.clone());
        let payload = ImportPayload {
            folder_id: "folder".to_string(),
            source: "google_drive".to_string(),
            requested_at: Utc::now(),
        };
        let id = queue
            .enqueue("import-drive-folder", payload, JobOptions::default())
            .await
            .unwrap();

        let waiting = service.get_status(&id).await.unwrap().unwrap();
        assert_eq!(waiting.state, JobState::Waiting);
        assert!(waiting.processed_at.is_none());

        queue.dequeue().await.unwrap().unwrap();
        queue.update_progress(&id, 55).await.unwrap();
        let active = service.get_status(&id).await.unwrap().unwrap();
        assert_eq!(active.state, JobState::Active);
        assert_eq!(active.progress, 55);
        assert!(active.result.is_none());

        queue.complete(&id, &ImportResult::empty_folder()).await.unwrap();
        let done = service.get_status(&id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.result, Some(ImportResult::empty_folder()));
        assert!(done.finished_at.is_some());
    }
}
