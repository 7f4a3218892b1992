use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use super::error::ApiError;
use super::ApiResponse;
use crate::app_state::AppState;
use crate::models::import::{ImportAccepted, ImportRequest};
use crate::services::submission::ImportSource;

/// POST /api/import/google-drive — queue an import of a shared Drive folder.
pub async fn import_google_drive(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ImportAccepted>>), ApiError> {
    request.validate()?;

    let source = ImportSource::GoogleDrive;
    let submitted = state.submitter.submit(&request.folder_url, source).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::ok(ImportAccepted {
            job_id: submitted.job_id,
            folder_id: submitted.folder_id,
            source: source.to_string(),
            status: "queued".to_string(),
        })),
    ))
}
