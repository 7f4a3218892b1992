use std::sync::Arc;

use crate::db::repository::ImageRepository;
use crate::models::job::JobOptions;
use crate::services::{
    queue::JobQueue,
    reconcile::ReconciliationSweep,
    status::JobStatusService,
    storage::ObjectStore,
    submission::ImportSubmitter,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub images: Arc<dyn ImageRepository>,
    pub storage: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn JobQueue>,
    pub submitter: Arc<ImportSubmitter>,
    pub status: Arc<JobStatusService>,
    pub sweep: Arc<ReconciliationSweep>,
}

impl AppState {
    pub fn new(
        images: Arc<dyn ImageRepository>,
        storage: Arc<dyn ObjectStore>,
        queue: Arc<dyn JobQueue>,
        job_options: JobOptions,
        reconcile_batch_size: usize,
    ) -> Self {
        Self {
            submitter: Arc::new(ImportSubmitter::new(queue.clone(), job_options)),
            status: Arc::new(JobStatusService::new(queue.clone())),
            sweep: Arc::new(ReconciliationSweep::new(
                images.clone(),
                storage.clone(),
                reconcile_batch_size,
            )),
            images,
            storage,
            queue,
        }
    }
}
