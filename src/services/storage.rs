use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use regex::Regex;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::sync::OnceLock;

/// Folder under which imported objects are written.
pub const IMPORT_FOLDER: &str = "imported";

/// An object returned by a folder listing, named relative to that folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub name: String,
}

/// Object storage used for imported images.
///
/// The backing API only exposes list/search, so existence checks go through
/// [`ObjectStore::list_matching`] (see [`object_exists`]).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` at `path` and return its public location.
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<String, StorageError>;

    /// Objects in `folder` whose name starts with `pattern`.
    async fn list_matching(&self, folder: &str, pattern: &str)
        -> Result<Vec<ObjectEntry>, StorageError>;

    /// Delete the object at `path`. Returns false if nothing was removed.
    async fn remove(&self, path: &str) -> Result<bool, StorageError>;

    /// Map a public location produced by [`ObjectStore::put`] back to a store path.
    fn path_for_location(&self, location: &str) -> Option<String>;
}

/// Replace everything outside `[A-Za-z0-9.-]` with `_`.
pub fn sanitize_name(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9.-]").expect("valid regex"));
    re.replace_all(name, "_").into_owned()
}

/// Object path for a newly imported file: `imported/{millis}-{nonce}-{name}`.
///
/// The random nonce keeps concurrent transfers of equally named files in the
/// same millisecond from colliding.
pub fn generate_object_path(original_name: &str, now: DateTime<Utc>) -> String {
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}/{}-{}-{}",
        IMPORT_FOLDER,
        now.timestamp_millis(),
        &nonce[..8],
        sanitize_name(original_name)
    )
}

/// Split `a/b/c.jpg` into (`a/b`, `c.jpg`).
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((folder, name)) => (folder, name),
        None => ("", path),
    }
}

/// Path of an object inside `bucket`, given a public URL of the form
/// `https://host/.../{bucket}/{path}`.
pub fn path_after_bucket(location: &str, bucket: &str) -> Option<String> {
    let marker = format!("/{bucket}/");
    location
        .split_once(&marker)
        .map(|(_, path)| path.to_string())
        .filter(|path| !path.is_empty() && !path.ends_with('/'))
}

/// Whether the object behind a public location still exists.
///
/// Lists the containing folder searching for the exact file name. An
/// unmappable location is an error, never a "missing" answer.
pub async fn object_exists(store: &dyn ObjectStore, location: &str) -> Result<bool, StorageError> {
    let path = store
        .path_for_location(location)
        .ok_or_else(|| StorageError::MalformedLocation(location.to_string()))?;
    let (folder, name) = split_path(&path);

    let entries = store.list_matching(folder, name).await?;
    Ok(entries.iter().any(|entry| entry.name == name))
}

/// Client for S3-compatible object storage (Supabase Storage, R2, MinIO).
pub struct S3ObjectStore {
    bucket: Box<Bucket>,
    bucket_name: String,
    public_base_url: String,
}

impl S3ObjectStore {
    pub fn new(
        bucket_name: &str,
        region: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        public_base_url: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            bucket_name: bucket_name.to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn public_location(&self, path: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, self.bucket_name, path)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<String, StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(path, &data, content_type)
            .await?;

        let code = response.status_code();
        if !(200..300).contains(&code) {
            return Err(StorageError::Status {
                code,
                path: path.to_string(),
            });
        }

        Ok(self.public_location(path))
    }

    async fn list_matching(
        &self,
        folder: &str,
        pattern: &str,
    ) -> Result<Vec<ObjectEntry>, StorageError> {
        let prefix = if folder.is_empty() {
            pattern.to_string()
        } else {
            format!("{folder}/{pattern}")
        };
        let folder_prefix = if folder.is_empty() {
            String::new()
        } else {
            format!("{folder}/")
        };

        let pages = self.bucket.list(prefix, Some("/".to_string())).await?;

        Ok(pages
            .iter()
            .flat_map(|page| page.contents.iter())
            .filter_map(|object| object.key.strip_prefix(&folder_prefix))
            .map(|name| ObjectEntry {
                name: name.to_string(),
            })
            .collect())
    }

    async fn remove(&self, path: &str) -> Result<bool, StorageError> {
        let response = self.bucket.delete_object(path).await?;
        match response.status_code() {
            200..=299 => Ok(true),
            404 => Ok(false),
            code => Err(StorageError::Status {
                code,
                path: path.to_string(),
            }),
        }
    }

    fn path_for_location(&self, location: &str) -> Option<String> {
        path_after_bucket(location, &self.bucket_name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object storage returned HTTP {code} for {path}")]
    Status { code: u16, path: String },

    #[error("Storage location is not a path in this bucket: {0}")]
    MalformedLocation(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
