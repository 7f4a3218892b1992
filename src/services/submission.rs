//! Producer side: turn a user-supplied folder reference into a queued import job.

use chrono::Utc;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use strum::{Display, EnumString};
use tracing::info;

use super::pipeline::IMPORT_JOB_NAME;
use super::queue::{JobQueue, QueueError};
use crate::models::job::{ImportPayload, JobOptions};

/// Providers an import can be requested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ImportSource {
    GoogleDrive,
}

impl ImportSource {
    /// Prefix of job ids created for this source.
    fn job_prefix(self) -> &'static str {
        match self {
            ImportSource::GoogleDrive => "gdrive",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Invalid Google Drive folder URL or ID: {0}")]
    InvalidFolderReference(String),

    #[error("Failed to enqueue import job: {0}")]
    Queue(#[from] QueueError),
}

/// Extract a Drive folder id from a share URL, an `?id=` URL, or a bare id.
pub fn extract_folder_id(input: &str) -> Option<String> {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            Regex::new(r"/folders/([a-zA-Z0-9_-]+)").expect("valid regex"),
            Regex::new(r"[?&]id=([a-zA-Z0-9_-]+)").expect("valid regex"),
            Regex::new(r"^([a-zA-Z0-9_-]+)$").expect("valid regex"),
        ]
    });

    let input = input.trim();
    patterns
        .iter()
        .find_map(|re| re.captures(input))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// A job accepted by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub job_id: String,
    pub folder_id: String,
}

pub struct ImportSubmitter {
    queue: Arc<dyn JobQueue>,
    options: JobOptions,
}

impl ImportSubmitter {
    pub fn new(queue: Arc<dyn JobQueue>, options: JobOptions) -> Self {
        Self { queue, options }
    }

    /// Validate `folder_ref` and enqueue an import job for it.
    pub async fn submit(
        &self,
        folder_ref: &str,
        source: ImportSource,
    ) -> Result<SubmittedJob, SubmitError> {
        let folder_id = extract_folder_id(folder_ref)
            .ok_or_else(|| SubmitError::InvalidFolderReference(folder_ref.to_string()))?;

        let now = Utc::now();
        let job_id = format!(
            "{}-{}-{}",
            source.job_prefix(),
            folder_id,
            now.timestamp_millis()
        );

        let payload = ImportPayload {
            folder_id: folder_id.clone(),
            source: source.to_string(),
            requested_at: now,
        };
        let options = JobOptions {
            job_id: Some(job_id),
            ..self.options.clone()
        };

        let job_id = self.queue.enqueue(IMPORT_JOB_NAME, payload, options).await?;
        metrics::counter!("import_jobs_submitted_total", "source" => source.to_string()).increment(1);
        info!(job_id = %job_id, folder_id = %folder_id, %source, "Import job queued");

        Ok(SubmittedJob { job_id, folder_id })
    }
}
