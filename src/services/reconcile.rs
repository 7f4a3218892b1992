//! Reconciliation sweep: remove image records whose stored object is gone.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::storage::{object_exists, ObjectStore};
use crate::db::repository::ImageRepository;
use crate::models::image::ImageRecord;

/// Default number of records checked concurrently.
pub const DEFAULT_BATCH_SIZE: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Failed to load image records: {0}")]
    Database(#[from] sqlx::Error),
}

/// A record the sweep could not reconcile. The record was left in place.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SweepError {
    pub id: Uuid,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub total_checked: usize,
    pub removed_count: usize,
    pub removed_ids: Vec<Uuid>,
    pub errors: Vec<SweepError>,
}

enum Check {
    Present,
    Removed(Uuid),
    /// Object missing, but the record was deleted by someone else first.
    AlreadyGone,
    Failed(SweepError),
}

pub struct ReconciliationSweep {
    images: Arc<dyn ImageRepository>,
    storage: Arc<dyn ObjectStore>,
    batch_size: usize,
}

impl ReconciliationSweep {
    pub fn new(
        images: Arc<dyn ImageRepository>,
        storage: Arc<dyn ObjectStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            images,
            storage,
            batch_size: batch_size.max(1),
        }
    }

    /// Check every image record against object storage.
    ///
    /// Batches run one after another; records within a batch are checked
    /// concurrently. Only a definitive "missing" answer deletes a record.
    pub async fn sweep(&self) -> Result<SweepReport, ReconcileError> {
        let records = self.images.list_all().await?;
        let mut report = SweepReport {
            total_checked: records.len(),
            ..SweepReport::default()
        };

        info!(total = records.len(), batch_size = self.batch_size, "Starting storage reconciliation");

        for batch in records.chunks(self.batch_size) {
            let checks = join_all(batch.iter().map(|record| self.check(record))).await;
            for check in checks {
                match check {
                    Check::Present | Check::AlreadyGone => {}
                    Check::Removed(id) => report.removed_ids.push(id),
                    Check::Failed(error) => report.errors.push(error),
                }
            }
        }

        report.removed_count = report.removed_ids.len();
        metrics::counter!("reconcile_removed_total").increment(report.removed_count as u64);
        info!(
            total_checked = report.total_checked,
            removed = report.removed_count,
            errors = report.errors.len(),
            "Storage reconciliation finished"
        );
        Ok(report)
    }

    async fn check(&self, record: &ImageRecord) -> Check {
        let exists = match object_exists(self.storage.as_ref(), &record.storage_location).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(image_id = %record.id, error = %e, "Could not check stored object");
                return Check::Failed(SweepError {
                    id: record.id,
                    message: e.to_string(),
                });
            }
        };

        if exists {
            return Check::Present;
        }

        match self.images.delete(record.id).await {
            Ok(true) => {
                info!(image_id = %record.id, location = %record.storage_location, "Removed record for missing object");
                Check::Removed(record.id)
            }
            Ok(false) => {
                debug!(image_id = %record.id, "Record for missing object was already gone");
                Check::AlreadyGone
            }
            Err(e) => {
                warn!(image_id = %record.id, error = %e, "Failed to delete record for missing object");
                Check::Failed(SweepError {
                    id: record.id,
                    message: format!("failed to delete record: {e}"),
                })
            }
        }
    }
}
