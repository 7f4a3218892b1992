use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::image::ImageRecord;

/// Maximum page size for image listings.
pub const MAX_PAGE_SIZE: i64 = 1_000;

/// Default page size for image listings.
pub const DEFAULT_PAGE_SIZE: i64 = 100;

/// Request to import every image in a Google Drive folder.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    #[garde(length(min = 1, max = 2048))]
    pub folder_url: String,
}

/// Response after an import job was queued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportAccepted {
    pub job_id: String,
    pub folder_id: String,
    pub source: String,
    pub status: String,
}

/// Query string for `GET /api/images`.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ImageListQuery {
    #[garde(length(min = 1, max = 64))]
    pub source: Option<String>,

    #[garde(range(min = 1, max = MAX_PAGE_SIZE))]
    pub limit: Option<i64>,

    #[garde(range(min = 0))]
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageList {
    pub images: Vec<ImageRecord>,
    pub pagination: Pagination,
}
