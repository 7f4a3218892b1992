mod helpers;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use helpers::{payload, remote_item, FakeImages, FakeProvider, FakeStore};
use image_import::models::job::{BackoffPolicy, ImportResult, JobOptions, JobRecord, JobState};
use image_import::services::memory_queue::MemoryJobQueue;
use image_import::services::pipeline::{ImportPipeline, IMPORT_JOB_NAME};
use image_import::services::provider::ProviderError;
use image_import::services::queue::{JobQueue, QueueSettings};
use image_import::services::submission::{ImportSource, ImportSubmitter};
use image_import::services::worker::{
    HandlerError, JobHandler, ProgressSink, WorkerConfig, WorkerPool,
};

fn fast_config(concurrency: usize) -> WorkerConfig {
    WorkerConfig {
        concurrency,
        rate_max: 100,
        rate_window: Duration::from_millis(1_000),
        poll_interval: Duration::from_millis(10),
        stalled_check_interval: Duration::from_secs(60),
        lease_renew_interval: Duration::from_secs(30),
    }
}

fn start(
    queue: Arc<MemoryJobQueue>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
) -> (CancellationToken, JoinHandle<()>) {
    let pool = WorkerPool::new(queue, handler, config);
    let token = CancellationToken::new();
    let run_token = token.clone();
    let handle = tokio::spawn(async move { pool.run(run_token).await });
    (token, handle)
}

async fn wait_for_state(queue: &MemoryJobQueue, job_id: &str, state: JobState) -> JobRecord {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(job) = queue.get_job(job_id).await.unwrap() {
                if job.state == state {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {job_id} never reached {state}"))
}

/// Sleeps, counting how many executions overlap.
#[derive(Default)]
struct SlowHandler {
    running: AtomicUsize,
    max_running: AtomicUsize,
    starts: Mutex<Vec<Instant>>,
    delay: Duration,
}

#[async_trait]
impl JobHandler for SlowHandler {
    fn job_name(&self) -> &str {
        IMPORT_JOB_NAME
    }

    async fn handle(
        &self,
        _job: &JobRecord,
        progress: &dyn ProgressSink,
    ) -> Result<ImportResult, HandlerError> {
        self.starts.lock().unwrap().push(Instant::now());
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        progress.report(50).await;
        tokio::time::sleep(self.delay).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(ImportResult::empty_folder())
    }
}

async fn enqueue(queue: &MemoryJobQueue, id: &str) {
    let options = JobOptions {
        job_id: Some(id.to_string()),
        ..JobOptions::default()
    };
    queue.enqueue(IMPORT_JOB_NAME, payload(id), options).await.unwrap();
}

#[tokio::test]
async fn test_submitted_import_runs_to_completion() {
    let queue = Arc::new(MemoryJobQueue::default());
    let images = Arc::new(FakeImages::default());
    let pipeline = ImportPipeline::new(
        Arc::new(FakeProvider::with_items(vec![
            remote_item("a", "one.png"),
            remote_item("b", "two.png"),
        ])),
        Arc::new(FakeStore::default()),
        images.clone(),
    );

    let submitted = ImportSubmitter::new(queue.clone(), JobOptions::default())
        .submit("https://drive.google.com/drive/folders/abc123", ImportSource::GoogleDrive)
        .await
        .unwrap();

    let (token, handle) = start(queue.clone(), Arc::new(pipeline), fast_config(5));
    let job = wait_for_state(&queue, &submitted.job_id, JobState::Completed).await;
    token.cancel();
    handle.await.unwrap();

    assert_eq!(job.progress, 100);
    assert_eq!(job.attempts_made, 1);
    let result = job.result.expect("result stored on completion");
    assert_eq!((result.total, result.processed), (2, 2));
    assert_eq!(images.all().len(), 2);
}

#[tokio::test]
async fn test_listing_failure_retries_then_fails() {
    let queue = Arc::new(MemoryJobQueue::default());
    let provider = FakeProvider {
        listing_error: Some(|| ProviderError::PermissionDenied("folder private".to_string())),
        ..FakeProvider::default()
    };
    let pipeline = ImportPipeline::new(
        Arc::new(provider),
        Arc::new(FakeStore::default()),
        Arc::new(FakeImages::default()),
    );
    let options = JobOptions {
        job_id: Some("retry-me".to_string()),
        max_attempts: 2,
        backoff: BackoffPolicy::exponential(20),
    };
    queue
        .enqueue(IMPORT_JOB_NAME, payload("private"), options)
        .await
        .unwrap();

    let (token, handle) = start(queue.clone(), Arc::new(pipeline), fast_config(1));
    let job = wait_for_state(&queue, "retry-me", JobState::Failed).await;
    token.cancel();
    handle.await.unwrap();

    assert_eq!(job.attempts_made, 2);
    assert!(job.result.is_none());
    let reason = job.failed_reason.expect("failure reason recorded");
    assert!(reason.contains("Permission denied"), "unexpected reason: {reason}");
}

#[tokio::test]
async fn test_concurrency_cap_is_respected() {
    let queue = Arc::new(MemoryJobQueue::default());
    for i in 0..6 {
        enqueue(&queue, &format!("job-{i}")).await;
    }
    let handler = Arc::new(SlowHandler {
        delay: Duration::from_millis(50),
        ..SlowHandler::default()
    });

    let (token, handle) = start(queue.clone(), handler.clone(), fast_config(2));
    for i in 0..6 {
        wait_for_state(&queue, &format!("job-{i}"), JobState::Completed).await;
    }
    token.cancel();
    handle.await.unwrap();

    assert_eq!(handler.max_running.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_admission_rate_spaces_out_job_starts() {
    let queue = Arc::new(MemoryJobQueue::default());
    for i in 0..3 {
        enqueue(&queue, &format!("job-{i}")).await;
    }
    let handler = Arc::new(SlowHandler::default());
    let config = WorkerConfig {
        rate_max: 2,
        rate_window: Duration::from_millis(300),
        ..fast_config(5)
    };

    let (token, handle) = start(queue.clone(), handler.clone(), config);
    wait_for_state(&queue, "job-2", JobState::Completed).await;
    token.cancel();
    handle.await.unwrap();

    let starts = handler.starts.lock().unwrap().clone();
    assert_eq!(starts.len(), 3);
    assert!(starts[2].duration_since(starts[0]) >= Duration::from_millis(250));
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_jobs() {
    let queue = Arc::new(MemoryJobQueue::default());
    enqueue(&queue, "long").await;
    let handler = Arc::new(SlowHandler {
        delay: Duration::from_millis(200),
        ..SlowHandler::default()
    });

    let (token, handle) = start(queue.clone(), handler, fast_config(1));
    wait_for_state(&queue, "long", JobState::Active).await;
    token.cancel();
    handle.await.unwrap();

    let job = queue.get_job("long").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(queue.counts().await.unwrap().active, 0);
}

#[tokio::test]
async fn test_long_running_job_keeps_its_claim() {
    let queue = Arc::new(MemoryJobQueue::new(QueueSettings {
        lease: Duration::from_millis(100),
        ..QueueSettings::default()
    }));
    enqueue(&queue, "slow").await;
    let handler = Arc::new(SlowHandler {
        delay: Duration::from_millis(300),
        ..SlowHandler::default()
    });
    let config = WorkerConfig {
        stalled_check_interval: Duration::from_millis(20),
        lease_renew_interval: Duration::from_millis(30),
        ..fast_config(2)
    };

    let (token, handle) = start(queue.clone(), handler.clone(), config);
    let job = wait_for_state(&queue, "slow", JobState::Completed).await;
    token.cancel();
    handle.await.unwrap();

    assert_eq!(handler.starts.lock().unwrap().len(), 1);
    assert_eq!(handler.max_running.load(Ordering::SeqCst), 1);
    assert_eq!(job.attempts_made, 1);
}
