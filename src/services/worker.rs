//! Worker pool: claims jobs from the queue and runs them through a handler.
//!
//! Admission is bounded twice: a concurrency cap (semaphore permits) and an
//! admission rate (at most `rate_max` job starts per `rate_window`).

use async_trait::async_trait;
use std::any::Any;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::limiter::AdmissionLimiter;
use super::queue::{JobQueue, QueueSettings};
use crate::models::job::{FailOutcome, ImportResult, JobRecord};

/// Error type returned by job handlers. Its display text becomes the job's
/// `failedReason`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum jobs executing at once.
    pub concurrency: usize,
    /// Job starts admitted per `rate_window`.
    pub rate_max: u32,
    pub rate_window: Duration,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    pub stalled_check_interval: Duration,
    /// How often a running job's claim is renewed. Must stay below the queue lease.
    pub lease_renew_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            rate_max: 10,
            rate_window: Duration::from_millis(1_000),
            poll_interval: Duration::from_millis(1_000),
            stalled_check_interval: Duration::from_secs(30),
            lease_renew_interval: QueueSettings::default().lease_renew_interval(),
        }
    }
}

/// Receives progress updates (0-100) from a running job.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: u8);
}

/// Executes jobs of a single type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Job type this handler accepts.
    fn job_name(&self) -> &str;

    async fn handle(
        &self,
        job: &JobRecord,
        progress: &dyn ProgressSink,
    ) -> Result<ImportResult, HandlerError>;
}

/// Forwards progress to the queue, dropping reports that would not move it
/// forward, and renews the job's claim while it runs.
struct JobProgress {
    queue: Arc<dyn JobQueue>,
    job_id: String,
    last: AtomicU8,
    /// Serialises this job's record writes.
    writes: Mutex<()>,
}

impl JobProgress {
    fn new(queue: Arc<dyn JobQueue>, job: &JobRecord) -> Self {
        Self {
            queue,
            job_id: job.id.clone(),
            last: AtomicU8::new(job.progress),
            writes: Mutex::new(()),
        }
    }

    async fn renew_lease(&self) {
        let _guard = self.writes.lock().await;
        match self.queue.extend_lease(&self.job_id).await {
            Ok(()) => debug!(job_id = %self.job_id, "Renewed job lease"),
            Err(e) => warn!(job_id = %self.job_id, error = %e, "Failed to renew job lease"),
        }
    }
}

#[async_trait]
impl ProgressSink for JobProgress {
    async fn report(&self, progress: u8) {
        let progress = progress.min(100);
        let previous = self.last.fetch_max(progress, Ordering::SeqCst);
        if progress <= previous {
            return;
        }

        // Progress is advisory; a lost update must not fail the job.
        let _guard = self.writes.lock().await;
        if let Err(e) = self.queue.update_progress(&self.job_id, progress).await {
            warn!(job_id = %self.job_id, progress, error = %e, "Failed to record job progress");
        }
    }
}

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn JobQueue>, handler: Arc<dyn JobHandler>, config: WorkerConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            queue,
            handler,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            config,
        }
    }

    /// Pull and execute jobs until `shutdown` is cancelled, then wait for
    /// in-flight jobs to finish.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut limiter = AdmissionLimiter::new(self.config.rate_max, self.config.rate_window);
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut stalled_check = tokio::time::interval(self.config.stalled_check_interval);
        stalled_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            job_name = self.handler.job_name(),
            concurrency = self.config.concurrency,
            rate_max = self.config.rate_max,
            rate_window_ms = self.config.rate_window.as_millis() as u64,
            "Worker pool started"
        );

        loop {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Job task terminated abnormally");
                }
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = stalled_check.tick() => {
                    self.recover_stalled().await;
                    continue;
                }
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = limiter.ready() => {}
            }

            let job = match self.queue.dequeue().await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    drop(permit);
                    self.idle(&shutdown).await;
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Failed to dequeue job, will retry");
                    drop(permit);
                    self.idle(&shutdown).await;
                    continue;
                }
            };
            limiter.record();

            let queue = self.queue.clone();
            let handler = self.handler.clone();
            let renew_every = self.config.lease_renew_interval;
            tasks.spawn(async move {
                let _permit = permit;
                process_job(queue, handler, job, renew_every).await;
            });
        }

        info!(in_flight = tasks.len(), "Worker pool stopping, waiting for in-flight jobs");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Job task terminated abnormally");
            }
        }
        info!("Worker pool stopped");
    }

    async fn idle(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }

    async fn recover_stalled(&self) {
        match self.queue.recover_stalled().await {
            Ok(0) => debug!("No stalled jobs"),
            Ok(recovered) => warn!(recovered, "Returned stalled jobs to the queue"),
            Err(e) => error!(error = %e, "Stalled job check failed"),
        }
    }
}

/// Run one claimed job to a terminal outcome and report it to the queue,
/// renewing its claim every `renew_every` until the handler returns.
async fn process_job(
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    job: JobRecord,
    renew_every: Duration,
) {
    let job_id = job.id.clone();
    let started = Instant::now();

    if job.name != handler.job_name() {
        let reason = format!("No handler registered for job type {}", job.name);
        record_failure(&queue, &job_id, &reason).await;
        return;
    }

    info!(
        job_id = %job_id,
        folder_id = %job.payload.folder_id,
        attempt = job.attempts_made + 1,
        "Processing import job"
    );

    let progress = Arc::new(JobProgress::new(queue.clone(), &job));
    let sink = progress.clone();

    // A separate task so a panicking handler surfaces as a JoinError.
    let mut execution = tokio::spawn(async move { handler.handle(&job, &*sink).await });

    let renew_every = renew_every.max(Duration::from_millis(1));
    let mut renewal =
        tokio::time::interval_at(tokio::time::Instant::now() + renew_every, renew_every);
    renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let joined = loop {
        tokio::select! {
            joined = &mut execution => break joined,
            _ = renewal.tick() => progress.renew_lease().await,
        }
    };

    let outcome = match joined {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) if e.is_panic() => Err(format!(
            "Job handler panicked: {}",
            panic_message(e.into_panic())
        )),
        Err(e) => Err(e.to_string()),
    };

    match outcome {
        Ok(result) => match queue.complete(&job_id, &result).await {
            Ok(()) => {
                metrics::counter!("import_jobs_completed_total").increment(1);
                info!(
                    job_id = %job_id,
                    total = result.total,
                    processed = result.processed,
                    failed = result.failed,
                    skipped = result.skipped,
                    "Import job completed"
                );
            }
            Err(e) => error!(job_id = %job_id, error = %e, "Failed to record job completion"),
        },
        Err(reason) => record_failure(&queue, &job_id, &reason).await,
    }

    metrics::histogram!("import_job_duration_seconds").record(started.elapsed().as_secs_f64());
}

async fn record_failure(queue: &Arc<dyn JobQueue>, job_id: &str, reason: &str) {
    match queue.fail(job_id, reason).await {
        Ok(FailOutcome::Retry { attempt, delay }) => warn!(
            job_id,
            attempt,
            retry_in_ms = delay.as_millis() as u64,
            reason,
            "Import job failed, retry scheduled"
        ),
        Ok(FailOutcome::Failed) => {
            metrics::counter!("import_jobs_failed_total").increment(1);
            error!(job_id, reason, "Import job failed permanently");
        }
        Err(e) => error!(job_id, error = %e, "Failed to record job failure"),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
