use axum::extract::{Path, State};
use axum::Json;

use super::error::ApiError;
use super::ApiResponse;
use crate::app_state::AppState;
use crate::models::job::JobStatus;

/// GET /api/jobs/{job_id} — current state, progress and result of an import job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<JobStatus>>, ApiError> {
    let status = state
        .status
        .get_status(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Job {job_id} not found")))?;

    Ok(Json(ApiResponse::ok(status)))
}
