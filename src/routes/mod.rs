pub mod error;
pub mod health;
pub mod images;
pub mod import;
pub mod jobs;
pub mod metrics;

use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;

use crate::app_state::AppState;

/// Success envelope: `{"success": true, "data": ...}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// API routes, without the metrics endpoint and middleware layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/import/google-drive", post(import::import_google_drive))
        .route("/api/jobs/{job_id}", get(jobs::get_job_status))
        .route("/api/images", get(images::list_images))
        .route("/api/images/sync", post(images::sync_images))
        .route(
            "/api/images/{id}",
            get(images::get_image).delete(images::delete_image),
        )
        .route("/api/stats", get(images::image_stats))
        .with_state(state)
}
