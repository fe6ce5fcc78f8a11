//! Cloud Storage for Firebase module.
//!
//! This module talks to the Firebase Storage REST API (`/v0/b/{bucket}/o`) as the
//! signed-in user, so the bucket's security rules apply. It supports listing,
//! uploading (with progress), downloading and deleting files, reading their
//! metadata and resolving token-bearing download URLs.
//!
//! # Examples
//!
//! ```rust,ignore
//! # use firebase_showcase::FirebaseApp;
//! # async fn run(app: FirebaseApp) {
//! let storage = app.storage();
//! let bucket = storage.bucket(None); // Use default bucket
//!
//! // Upload a file
//! let file = bucket.file("images/hello.txt");
//! let _ = file.save(b"Hello, World!".to_vec(), "text/plain").await;
//! let url = file.download_url().await;
//! # }
//! ```

pub mod bucket;
pub mod file;
pub mod upload;

use crate::core::middleware::{IdTokenMiddleware, TokenPlacement};
use crate::core::{ApiClient, Session};
use bucket::Bucket;
use thiserror::Error;

const STORAGE_V0_API: &str = "https://firebasestorage.googleapis.com/v0";

/// Errors that can occur during Storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Wrapper for `reqwest::Error`.
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// Wrapper for `reqwest_middleware::Error`.
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    /// Errors returned by the Storage API.
    #[error("API error: {0}")]
    ApiError(String),
    /// Wrapper for `serde_json::Error`.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    /// The object has no download token, so no public download URL can be built.
    #[error("No download token for {0}")]
    NoDownloadToken(String),
}

/// Client for interacting with Cloud Storage for Firebase.
#[derive(Clone)]
pub struct FirebaseStorage {
    client: ApiClient,
    base_url: String,
    default_bucket: String,
}

impl FirebaseStorage {
    /// Creates a new `FirebaseStorage` instance.
    ///
    /// This is typically called via `FirebaseApp::storage()`. Requests carry the
    /// session's id token as `Authorization: Firebase <token>`.
    pub fn new(session: Session, default_bucket: String) -> Self {
        Self::new_with_url(session, default_bucket, STORAGE_V0_API.to_string())
    }

    /// Creates a new `FirebaseStorage` instance with a custom base URL (the emulator, or tests).
    pub fn new_with_url(session: Session, default_bucket: String, base_url: String) -> Self {
        Self {
            client: ApiClient::new(IdTokenMiddleware::new(session, TokenPlacement::Header("Firebase"))),
            base_url: base_url.trim_end_matches('/').to_string(),
            default_bucket,
        }
    }

    pub fn default_bucket(&self) -> &str {
        &self.default_bucket
    }

    /// Gets a `Bucket` instance that refers to the specific bucket.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the bucket (e.g. "my-project.appspot.com").
    ///            If not provided, the app's configured storage bucket is used.
    pub fn bucket(&self, name: Option<&str>) -> Bucket {
        Bucket::new(
            self.client.clone(),
            self.base_url.clone(),
            name.unwrap_or(&self.default_bucket).to_string(),
        )
    }
}
