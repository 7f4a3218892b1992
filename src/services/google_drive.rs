//! Google Drive v3 client for publicly shared folders.
//!
//! Authenticates with an API key, so only folders shared as "anyone with the
//! link" can be read.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::provider::{ByteStream, FileProvider, ProviderError, RemoteItem};

const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Google Drive API page size limit
const MAX_PAGE_SIZE: &str = "1000";

const LIST_FIELDS: &str = "nextPageToken, files(id, name, size, mimeType)";

/// A stalled response body fails after this long without receiving data.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    /// Decimal string; absent for Google-native documents.
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilesListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

impl From<DriveFile> for RemoteItem {
    fn from(file: DriveFile) -> Self {
        RemoteItem {
            external_id: file.id,
            name: file.name,
            size: file.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            mime_type: file.mime_type,
        }
    }
}

/// Which kind of resource a request targeted, for error messages.
#[derive(Debug, Clone, Copy)]
enum Resource {
    Folder,
    File,
}

pub struct GoogleDriveClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl GoogleDriveClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_base_url(DRIVE_API_BASE, api_key)
    }

    pub fn with_base_url(
        base_url: &str,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(READ_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn check(response: Response, resource: Resource, id: &str) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match (status, resource) {
            (StatusCode::NOT_FOUND, Resource::Folder) => Err(ProviderError::NotFound(format!(
                "folder {id} not found. Make sure the folder is publicly accessible."
            ))),
            (StatusCode::NOT_FOUND, Resource::File) => Err(ProviderError::NotFound(format!(
                "file {id} not found or not accessible."
            ))),
            (StatusCode::FORBIDDEN, Resource::Folder) => Err(ProviderError::PermissionDenied(format!(
                "folder {id}. Ensure the folder is shared publicly and the API key is valid."
            ))),
            (StatusCode::FORBIDDEN, Resource::File) => Err(ProviderError::PermissionDenied(format!(
                "file {id} might not be publicly accessible."
            ))),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::Other(format!(
                    "Google Drive returned HTTP {status} for {id}: {body}"
                )))
            }
        }
    }
}

#[async_trait]
impl FileProvider for GoogleDriveClient {
    async fn list_items(&self, folder_id: &str) -> Result<Vec<RemoteItem>, ProviderError> {
        let query = format!(
            "'{folder_id}' in parents and mimeType contains 'image/' and trashed=false"
        );
        let url = format!("{}/files", self.base_url);

        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("q", query.as_str()),
                ("fields", LIST_FIELDS),
                ("pageSize", MAX_PAGE_SIZE),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
                ("key", self.api_key.as_str()),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            let response = self.http.get(&url).query(&params).send().await?;
            let page: FilesListResponse = Self::check(response, Resource::Folder, folder_id)
                .await?
                .json()
                .await?;

            debug!(folder_id, page_len = page.files.len(), "Fetched Drive listing page");
            items.extend(page.files.into_iter().map(RemoteItem::from));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        info!(folder_id, count = items.len(), "Listed images in Drive folder");
        Ok(items)
    }

    async fn fetch_content(&self, external_id: &str) -> Result<ByteStream, ProviderError> {
        let url = format!("{}/files/{}", self.base_url, external_id);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("alt", "media"),
                ("supportsAllDrives", "true"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let response = Self::check(response, Resource::File, external_id).await?;
        Ok(response.bytes_stream().map_err(ProviderError::from).boxed())
    }
}
