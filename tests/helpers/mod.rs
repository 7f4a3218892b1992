//! In-memory stand-ins for the external services, shared by integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use image_import::db::repository::ImageRepository;
use image_import::models::image::{ImageFilter, ImageRecord, ImageStats, NewImage};
use image_import::models::job::ImportPayload;
use image_import::services::provider::{ByteStream, FileProvider, ProviderError, RemoteItem};
use image_import::services::storage::{path_after_bucket, split_path, ObjectEntry, ObjectStore, StorageError};
use image_import::services::worker::ProgressSink;

pub const BUCKET: &str = "imported-images";
pub const PUBLIC_BASE: &str = "https://storage.test/object/public";

pub fn remote_item(id: &str, name: &str) -> RemoteItem {
    RemoteItem {
        external_id: id.to_string(),
        name: name.to_string(),
        size: 4,
        mime_type: "image/png".to_string(),
    }
}

pub fn payload(folder_id: &str) -> ImportPayload {
    ImportPayload {
        folder_id: folder_id.to_string(),
        source: "google_drive".to_string(),
        requested_at: Utc::now(),
    }
}

pub fn public_location(path: &str) -> String {
    format!("{PUBLIC_BASE}/{BUCKET}/{path}")
}

/// File provider serving a fixed folder listing.
#[derive(Default)]
pub struct FakeProvider {
    pub items: Vec<RemoteItem>,
    pub listing_error: Option<fn() -> ProviderError>,
    pub fetch_failures: HashSet<String>,
    /// Downloads of these ids break off after the first chunk.
    pub interrupted_fetches: HashSet<String>,
}

impl FakeProvider {
    pub fn with_items(items: Vec<RemoteItem>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }
}

#[async_trait]
impl FileProvider for FakeProvider {
    async fn list_items(&self, _folder_id: &str) -> Result<Vec<RemoteItem>, ProviderError> {
        match self.listing_error {
            Some(make_error) => Err(make_error()),
            None => Ok(self.items.clone()),
        }
    }

    async fn fetch_content(&self, external_id: &str) -> Result<ByteStream, ProviderError> {
        if self.fetch_failures.contains(external_id) {
            return Err(ProviderError::NotFound(format!("file {external_id}")));
        }
        let tail = if self.interrupted_fetches.contains(external_id) {
            Err(ProviderError::Other("connection reset mid-download".to_string()))
        } else {
            Ok(Bytes::from(external_id.as_bytes().to_vec()))
        };
        let chunks = vec![Ok(Bytes::from_static(b"im")), tail];
        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// Object store keyed by path. Uploads of files whose name contains any of
/// `reject_names` fail.
#[derive(Default)]
pub struct FakeStore {
    pub objects: Mutex<HashMap<String, Bytes>>,
    pub reject_names: Vec<String>,
    /// Listings of these exact file names fail.
    pub broken_names: HashSet<String>,
}

impl FakeStore {
    pub fn insert(&self, path: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), Bytes::from_static(b"x"));
    }

    pub fn delete(&self, path: &str) {
        self.objects.lock().unwrap().remove(path);
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn put(&self, path: &str, data: Bytes, _content_type: &str) -> Result<String, StorageError> {
        if self.reject_names.iter().any(|name| path.contains(name.as_str())) {
            return Err(StorageError::Status {
                code: 500,
                path: path.to_string(),
            });
        }
        self.objects.lock().unwrap().insert(path.to_string(), data);
        Ok(public_location(path))
    }

    async fn list_matching(&self, folder: &str, pattern: &str) -> Result<Vec<ObjectEntry>, StorageError> {
        if self.broken_names.contains(pattern) {
            return Err(StorageError::Config("listing timed out".to_string()));
        }
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .keys()
            .map(|key| split_path(key))
            .filter(|(dir, name)| *dir == folder && name.starts_with(pattern))
            .map(|(_, name)| ObjectEntry {
                name: name.to_string(),
            })
            .collect())
    }

    async fn remove(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.objects.lock().unwrap().remove(path).is_some())
    }

    fn path_for_location(&self, location: &str) -> Option<String> {
        path_after_bucket(location, BUCKET)
    }
}

/// Image repository backed by a vector, in insertion order.
#[derive(Default)]
pub struct FakeImages {
    pub records: Mutex<Vec<ImageRecord>>,
    /// Lookups for these external ids fail.
    pub lookup_failures: HashSet<String>,
}

impl FakeImages {
    pub fn seed(&self, external_id: &str, location: &str) -> ImageRecord {
        let record = ImageRecord {
            id: Uuid::new_v4(),
            name: format!("{external_id}.png"),
            external_id: external_id.to_string(),
            size: 4,
            mime_type: "image/png".to_string(),
            storage_location: location.to_string(),
            source: "google_drive".to_string(),
            created_at: Utc::now(),
        };
        self.records.lock().unwrap().push(record.clone());
        record
    }

    pub fn all(&self) -> Vec<ImageRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageRepository for FakeImages {
    async fn ping(&self) -> Result<(), sqlx::Error> {
        Ok(())
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<ImageRecord>, sqlx::Error> {
        if self.lookup_failures.contains(external_id) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.external_id == external_id)
            .cloned())
    }

    async fn insert(&self, image: &NewImage) -> Result<ImageRecord, sqlx::Error> {
        let record = ImageRecord {
            id: Uuid::new_v4(),
            name: image.name.clone(),
            external_id: image.external_id.clone(),
            size: image.size,
            mime_type: image.mime_type.clone(),
            storage_location: image.storage_location.clone(),
            source: image.source.clone(),
            created_at: Utc::now(),
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ImageRecord>, sqlx::Error> {
        Ok(self.records.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self, filter: &ImageFilter) -> Result<Vec<ImageRecord>, sqlx::Error> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .rev()
            .filter(|r| filter.source.as_deref().map_or(true, |s| r.source == s))
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .cloned()
            .collect())
    }

    async fn count(&self, source: Option<&str>) -> Result<i64, sqlx::Error> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| source.map_or(true, |s| r.source == s))
            .count() as i64)
    }

    async fn list_all(&self) -> Result<Vec<ImageRecord>, sqlx::Error> {
        Ok(self.all())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() != before)
    }

    async fn stats(&self) -> Result<ImageStats, sqlx::Error> {
        let records = self.records.lock().unwrap();
        let mut by_source = BTreeMap::new();
        for record in records.iter() {
            *by_source.entry(record.source.clone()).or_insert(0) += 1;
        }
        Ok(ImageStats {
            total_images: records.len() as i64,
            total_size: records.iter().map(|r| r.size).sum(),
            recent_imports_24h: records.len() as i64,
            by_source,
        })
    }
}

/// Progress sink that remembers every report.
#[derive(Default)]
pub struct RecordingProgress {
    pub reports: Mutex<Vec<u8>>,
}

impl RecordingProgress {
    pub fn reports(&self) -> Vec<u8> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingProgress {
    async fn report(&self, progress: u8) {
        self.reports.lock().unwrap().push(progress);
    }
}
