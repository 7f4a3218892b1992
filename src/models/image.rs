use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// An imported image persisted in the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: Uuid,
    pub name: String,
    /// Identifier of the file at the source provider (Google Drive file id).
    pub external_id: String,
    pub size: i64,
    pub mime_type: String,
    /// Public URL of the stored object. Not checked for integrity by the store.
    pub storage_location: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to insert a new image record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewImage {
    pub name: String,
    pub external_id: String,
    pub size: i64,
    pub mime_type: String,
    pub storage_location: String,
    pub source: String,
}

/// Filter and page for image listings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageFilter {
    pub source: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// Aggregate statistics over the image table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageStats {
    pub total_images: i64,
    pub total_size: i64,
    pub recent_imports_24h: i64,
    pub by_source: BTreeMap<String, i64>,
}
