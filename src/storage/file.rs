use crate::core::{parse_error_response, ApiClient};
use crate::storage::upload::{progress_body, UploadProgress};
use crate::storage::StorageError;
use bytes::Bytes;
use reqwest::header;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Represents a file within a Storage bucket.
#[derive(Clone)]
pub struct File {
    client: ApiClient,
    base_url: String,
    bucket_name: String,
    name: String,
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("bucket", &self.bucket_name)
            .field("name", &self.name)
            .finish()
    }
}

/// Metadata for a Storage object.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub name: Option<String>,
    pub bucket: Option<String>,
    pub generation: Option<String>,
    pub metageneration: Option<String>,
    pub content_type: Option<String>,
    pub time_created: Option<String>,
    pub updated: Option<String>,
    pub storage_class: Option<String>,
    pub size: Option<String>,
    pub md5_hash: Option<String>,
    pub content_encoding: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
    pub metadata: Option<std::collections::HashMap<String, String>>,
    pub crc32c: Option<String>,
    pub etag: Option<String>,
    /// Comma separated list of tokens that grant read access through a download URL.
    pub download_tokens: Option<String>,
}

impl ObjectMetadata {
    /// First download token, if the object has any.
    pub fn download_token(&self) -> Option<&str> {
        self.download_tokens
            .as_deref()
            .and_then(|tokens| tokens.split(',').map(str::trim).find(|t| !t.is_empty()))
    }
}

/// Percent-encodes an object name so it forms a single path segment.
pub(crate) fn encode_object_name(name: &str) -> String {
    url::form_urlencoded::byte_serialize(name.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

impl File {
    pub(crate) fn new(
        client: ApiClient,
        base_url: String,
        bucket_name: String,
        name: String,
    ) -> Self {
        Self {
            client,
            base_url,
            bucket_name,
            name,
        }
    }

    /// Returns the full path of the file, e.g. `images/cat.png`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the last path segment of the file.
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Returns the name of the bucket containing the file.
    pub fn bucket(&self) -> &str {
        &self.bucket_name
    }

    fn object_url(&self) -> String {
        format!(
            "{}/b/{}/o/{}",
            self.base_url,
            self.bucket_name,
            encode_object_name(&self.name)
        )
    }

    fn upload_url(&self) -> String {
        format!("{}/b/{}/o", self.base_url, self.bucket_name)
    }

    /// Uploads data to the file.
    ///
    /// This method uses the simple upload API.
    ///
    /// # Arguments
    ///
    /// * `body` - The data to upload.
    /// * `mime_type` - The MIME type of the data.
    pub async fn save(
        &self,
        body: impl Into<reqwest::Body>,
        mime_type: &str,
    ) -> Result<ObjectMetadata, StorageError> {
        let response = self
            .client
            .post(self.upload_url())
            .query(&[("uploadType", "media"), ("name", &self.name)])
            .header(header::CONTENT_TYPE, mime_type)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::ApiError(
                parse_error_response(response, "Upload failed").await,
            ));
        }

        Ok(response.json().await?)
    }

    /// Uploads `data`, publishing transferred bytes on `progress` as the body is sent.
    ///
    /// On success the progress is left at `total_bytes`. The request is never
    /// retried.
    pub async fn upload(
        &self,
        data: Bytes,
        mime_type: &str,
        progress: watch::Sender<UploadProgress>,
    ) -> Result<ObjectMetadata, StorageError> {
        let total = data.len() as u64;
        let body = progress_body(data, progress.clone());

        let response = self
            .client
            .once()
            .post(self.upload_url())
            .query(&[("uploadType", "media"), ("name", &self.name)])
            .header(header::CONTENT_TYPE, mime_type)
            .header(header::CONTENT_LENGTH, total)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::ApiError(
                parse_error_response(response, "Upload failed").await,
            ));
        }

        let metadata: ObjectMetadata = response.json().await?;
        progress.send_replace(UploadProgress {
            bytes_transferred: total,
            total_bytes: total,
        });
        tracing::debug!(name = %self.name, bytes = total, "Upload complete");

        Ok(metadata)
    }

    /// Downloads the file's content.
    pub async fn download(&self) -> Result<Bytes, StorageError> {
        let response = self
            .client
            .get(self.object_url())
            .query(&[("alt", "media")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::ApiError(
                parse_error_response(response, "Download failed").await,
            ));
        }

        Ok(response.bytes().await?)
    }

    /// Deletes the file.
    pub async fn delete(&self) -> Result<(), StorageError> {
        let response = self.client.delete(self.object_url()).send().await?;

        if !response.status().is_success() {
            return Err(StorageError::ApiError(
                parse_error_response(response, "Delete failed").await,
            ));
        }

        Ok(())
    }

    /// Gets the file's metadata.
    pub async fn metadata(&self) -> Result<ObjectMetadata, StorageError> {
        let response = self.client.get(self.object_url()).send().await?;

        if !response.status().is_success() {
            return Err(StorageError::ApiError(
                parse_error_response(response, "Get metadata failed").await,
            ));
        }

        Ok(response.json().await?)
    }

    /// Builds the long-lived download URL from the object's first download token.
    ///
    /// The URL can be fetched without credentials.
    pub async fn download_url(&self) -> Result<String, StorageError> {
        let metadata = self.metadata().await?;
        let token = metadata
            .download_token()
            .ok_or_else(|| StorageError::NoDownloadToken(self.name.clone()))?;

        Ok(format!("{}?alt=media&token={}", self.object_url(), token))
    }
}
