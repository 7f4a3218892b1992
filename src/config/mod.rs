use serde::Deserialize;
use std::time::Duration;

use crate::models::job::{BackoffPolicy, JobOptions};
use crate::services::worker::WorkerConfig;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for job queue
    pub redis_url: String,

    /// Google API key used to read publicly shared Drive folders. Required by the worker.
    pub google_api_key: Option<String>,

    /// Object storage bucket name
    pub storage_bucket: String,

    /// S3-compatible endpoint URL
    pub storage_endpoint: String,

    #[serde(default = "default_region")]
    pub storage_region: String,

    /// Access key ID (S3-compatible)
    pub storage_access_key: String,

    /// Secret access key (S3-compatible)
    pub storage_secret_key: String,

    /// Base URL under which objects are publicly served, e.g.
    /// "https://<project>.supabase.co/storage/v1/object/public".
    pub storage_public_url: String,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Job starts admitted per rate window.
    #[serde(default = "default_worker_rate_max")]
    pub worker_rate_max: u32,

    #[serde(default = "default_worker_rate_window_ms")]
    pub worker_rate_window_ms: u64,

    #[serde(default = "default_job_max_attempts")]
    pub job_max_attempts: u32,

    /// Base delay for exponential retry backoff
    #[serde(default = "default_job_backoff_ms")]
    pub job_backoff_ms: u64,

    #[serde(default = "default_reconcile_batch_size")]
    pub reconcile_batch_size: usize,

    /// Optional listen address for the worker's Prometheus exporter
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_worker_concurrency() -> usize {
    5
}

fn default_worker_rate_max() -> u32 {
    10
}

fn default_worker_rate_window_ms() -> u64 {
    1_000
}

fn default_job_max_attempts() -> u32 {
    3
}

fn default_job_backoff_ms() -> u64 {
    5_000
}

fn default_reconcile_batch_size() -> usize {
    5
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Default options applied to every submitted import job.
    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            job_id: None,
            max_attempts: self.job_max_attempts,
            backoff: BackoffPolicy::exponential(self.job_backoff_ms),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            concurrency: self.worker_concurrency.max(1),
            rate_max: self.worker_rate_max.max(1),
            rate_window: Duration::from_millis(self.worker_rate_window_ms.max(1)),
            ..WorkerConfig::default()
        }
    }
}
