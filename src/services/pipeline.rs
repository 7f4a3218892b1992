//! Folder import pipeline: list a remote folder and transfer each image into
//! object storage, recording one image row per transferred file.

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::Utc;
use futures::TryStreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::provider::{FileProvider, ProviderError, RemoteItem};
use super::storage::{generate_object_path, ObjectStore, StorageError};
use super::worker::{HandlerError, JobHandler, ProgressSink};
use crate::db::repository::ImageRepository;
use crate::models::image::NewImage;
use crate::models::job::{ImportPayload, ImportResult, JobRecord};

/// Job type handled by [`ImportPipeline`].
pub const IMPORT_JOB_NAME: &str = "import-drive-folder";

/// Progress reported once the folder listing is known.
const LISTED_PROGRESS: u8 = 10;

/// Share of the progress bar spent on item transfers.
const TRANSFER_SPAN: u32 = 85;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to list folder {folder_id}: {source}")]
    Listing {
        folder_id: String,
        #[source]
        source: ProviderError,
    },
}

/// Where a single item failed.
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("existence check failed: {0}")]
    Lookup(#[source] sqlx::Error),

    #[error("download failed: {0}")]
    Fetch(#[source] ProviderError),

    #[error("upload failed: {0}")]
    Upload(#[source] StorageError),

    #[error("metadata insert failed: {0}")]
    Persist(#[source] sqlx::Error),
}

impl ItemError {
    fn stage(&self) -> &'static str {
        match self {
            ItemError::Lookup(_) => "lookup",
            ItemError::Fetch(_) => "fetch",
            ItemError::Upload(_) => "upload",
            ItemError::Persist(_) => "persist",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Imported(Uuid),
    /// Already imported earlier.
    Skipped,
}

/// Running per-job counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportTally {
    pub processed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl ImportTally {
    pub fn record(&mut self, outcome: &Result<ItemOutcome, ItemError>) {
        match outcome {
            Ok(ItemOutcome::Imported(_)) => self.processed += 1,
            Ok(ItemOutcome::Skipped) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }

    pub fn into_result(self, total: u32) -> ImportResult {
        ImportResult {
            success: true,
            total,
            processed: self.processed,
            failed: self.failed,
            skipped: self.skipped,
            message: format!(
                "Import completed: {} processed, {} failed, {} skipped",
                self.processed, self.failed, self.skipped
            ),
        }
    }
}

/// Progress after finishing the item at `index` (0-based) out of `total`.
pub fn item_progress(index: usize, total: usize) -> u8 {
    if total == 0 {
        return LISTED_PROGRESS;
    }
    let done = (index + 1).min(total) as u32;
    let total = total as u32;
    let span = (TRANSFER_SPAN * done + total / 2) / total;
    LISTED_PROGRESS + span as u8
}

pub struct ImportPipeline {
    provider: Arc<dyn FileProvider>,
    storage: Arc<dyn ObjectStore>,
    images: Arc<dyn ImageRepository>,
}

impl ImportPipeline {
    pub fn new(
        provider: Arc<dyn FileProvider>,
        storage: Arc<dyn ObjectStore>,
        images: Arc<dyn ImageRepository>,
    ) -> Self {
        Self {
            provider,
            storage,
            images,
        }
    }

    /// Import every image in the payload's folder.
    ///
    /// Only a failed listing aborts the run. Item failures are counted and
    /// the remaining items are still attempted.
    pub async fn run(
        &self,
        payload: &ImportPayload,
        progress: &dyn ProgressSink,
    ) -> Result<ImportResult, PipelineError> {
        let folder_id = payload.folder_id.as_str();

        let items = self
            .provider
            .list_items(folder_id)
            .await
            .map_err(|source| PipelineError::Listing {
                folder_id: folder_id.to_string(),
                source,
            })?;

        progress.report(LISTED_PROGRESS).await;

        if items.is_empty() {
            info!(folder_id, "No images found in folder");
            progress.report(100).await;
            return Ok(ImportResult::empty_folder());
        }

        info!(folder_id, total = items.len(), "Starting folder import");

        let mut tally = ImportTally::default();
        for (index, item) in items.iter().enumerate() {
            let outcome = self.import_item(item, &payload.source).await;

            match &outcome {
                Ok(ItemOutcome::Imported(id)) => {
                    metrics::counter!("import_items_total", "outcome" => "imported").increment(1);
                    info!(external_id = %item.external_id, name = %item.name, image_id = %id, "Imported image");
                }
                Ok(ItemOutcome::Skipped) => {
                    metrics::counter!("import_items_total", "outcome" => "skipped").increment(1);
                    debug!(external_id = %item.external_id, "Image already imported, skipping");
                }
                Err(e) => {
                    metrics::counter!("import_items_total", "outcome" => "failed").increment(1);
                    warn!(
                        external_id = %item.external_id,
                        name = %item.name,
                        stage = e.stage(),
                        error = %e,
                        "Failed to import image"
                    );
                }
            }

            tally.record(&outcome);
            progress.report(item_progress(index, items.len())).await;
        }

        progress.report(100).await;
        Ok(tally.into_result(items.len() as u32))
    }

    async fn import_item(&self, item: &RemoteItem, source: &str) -> Result<ItemOutcome, ItemError> {
        if self
            .images
            .find_by_external_id(&item.external_id)
            .await
            .map_err(ItemError::Lookup)?
            .is_some()
        {
            return Ok(ItemOutcome::Skipped);
        }

        let stream = self
            .provider
            .fetch_content(&item.external_id)
            .await
            .map_err(ItemError::Fetch)?;
        let data = stream
            .try_fold(BytesMut::new(), |mut buf, chunk| async move {
                buf.extend_from_slice(&chunk);
                Ok(buf)
            })
            .await
            .map_err(ItemError::Fetch)?
            .freeze();

        let path = generate_object_path(&item.name, Utc::now());
        let location = self
            .storage
            .put(&path, data, &item.mime_type)
            .await
            .map_err(ItemError::Upload)?;

        let record = self
            .images
            .insert(&NewImage {
                name: item.name.clone(),
                external_id: item.external_id.clone(),
                size: item.size,
                mime_type: item.mime_type.clone(),
                storage_location: location,
                source: source.to_string(),
            })
            .await
            .map_err(ItemError::Persist)?;

        Ok(ItemOutcome::Imported(record.id))
    }
}

#[async_trait]
impl JobHandler for ImportPipeline {
    fn job_name(&self) -> &str {
        IMPORT_JOB_NAME
    }

    async fn handle(
        &self,
        job: &JobRecord,
        progress: &dyn ProgressSink,
    ) -> Result<ImportResult, HandlerError> {
        Ok(self.run(&job.payload, progress).await?)
    }
}
