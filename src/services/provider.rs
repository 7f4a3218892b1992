use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Streamed file content from a provider.
pub type ByteStream = BoxStream<'static, Result<Bytes, ProviderError>>;

/// A candidate file discovered in a source folder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteItem {
    pub external_id: String,
    pub name: String,
    pub size: i64,
    pub mime_type: String,
}

/// Classified errors from an external file provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider error: {0}")]
    Other(String),
}

/// Source of files to import (folder listing plus content download).
#[async_trait]
pub trait FileProvider: Send + Sync {
    /// Image files directly inside `folder_id`, in provider order, excluding trashed files.
    async fn list_items(&self, folder_id: &str) -> Result<Vec<RemoteItem>, ProviderError>;

    async fn fetch_content(&self, external_id: &str) -> Result<ByteStream, ProviderError>;
}
