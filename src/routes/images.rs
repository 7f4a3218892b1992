use axum::extract::{Path, Query, State};
use axum::Json;
use garde::Validate;
use serde::Serialize;
use uuid::Uuid;

use super::error::ApiError;
use super::ApiResponse;
use crate::app_state::AppState;
use crate::models::image::{ImageFilter, ImageRecord, ImageStats};
use crate::models::import::{ImageList, ImageListQuery, Pagination, DEFAULT_PAGE_SIZE};
use crate::services::reconcile::SweepReport;

#[derive(Debug, Serialize)]
pub struct DeletedImage {
    pub id: Uuid,
    /// Whether the stored object was removed too.
    #[serde(rename = "objectRemoved")]
    pub object_removed: bool,
}

/// GET /api/images — newest first, optionally filtered by source.
pub async fn list_images(
    State(state): State<AppState>,
    Query(query): Query<ImageListQuery>,
) -> Result<Json<ApiResponse<ImageList>>, ApiError> {
    query.validate()?;

    let filter = ImageFilter {
        source: query.source,
        limit: query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        offset: query.offset.unwrap_or(0),
    };

    let images = state.images.list(&filter).await?;
    let total = state.images.count(filter.source.as_deref()).await?;

    Ok(Json(ApiResponse::ok(ImageList {
        pagination: Pagination {
            total,
            limit: filter.limit,
            offset: filter.offset,
            has_more: filter.offset + (images.len() as i64) < total,
        },
        images,
    })))
}

/// GET /api/images/{id}
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ImageRecord>>, ApiError> {
    let image = state
        .images
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Image {id} not found")))?;

    Ok(Json(ApiResponse::ok(image)))
}

/// DELETE /api/images/{id} — remove the stored object (best effort) and the record.
pub async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DeletedImage>>, ApiError> {
    let image = state
        .images
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Image {id} not found")))?;

    let object_removed = match state.storage.path_for_location(&image.storage_location) {
        Some(path) => match state.storage.remove(&path).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(image_id = %id, path = %path, error = %e, "Failed to delete stored object");
                false
            }
        },
        None => {
            tracing::warn!(image_id = %id, location = %image.storage_location, "Storage location not in bucket, keeping object");
            false
        }
    };

    if !state.images.delete(id).await? {
        return Err(ApiError::not_found(format!("Image {id} not found")));
    }
    tracing::info!(image_id = %id, object_removed, "Image deleted");

    Ok(Json(ApiResponse::ok(DeletedImage { id, object_removed })))
}

/// POST /api/images/sync — drop records whose stored object no longer exists.
pub async fn sync_images(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<SweepReport>>, ApiError> {
    let report = state.sweep.sweep().await?;
    Ok(Json(ApiResponse::ok(report)))
}

/// GET /api/stats
pub async fn image_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ImageStats>>, ApiError> {
    let stats = state.images.stats().await?;
    Ok(Json(ApiResponse::ok(stats)))
}
