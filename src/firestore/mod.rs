//! Cloud Firestore module.
//!
//! This module provides functionality for interacting with Cloud Firestore as the
//! signed-in user, including references to collections and documents, structured
//! queries, batched writes and real-time updates.
//!
//! It mirrors the Firebase client SDK's structure using `CollectionReference` and `DocumentReference`.
//!
//! # Real-time Updates
//!
//! You can listen for changes to a document or to a query using the `listen()` method
//! on `DocumentReference` and `ExecutableQuery`. This returns a stream of `ListenResponse` events.

pub mod batch;
pub mod listen;
pub mod models;
pub mod query;
pub mod reference;
pub mod snapshot;


use self::batch::WriteBatch;
use self::query::{ExecutableQuery, Query};
use self::reference::{CollectionReference, DocumentReference};
use crate::core::middleware::{IdTokenMiddleware, TokenPlacement};
use crate::core::{ApiClient, Session};
use thiserror::Error;

const FIRESTORE_V1_API: &str = "https://firestore.googleapis.com/v1";
const DEFAULT_DATABASE: &str = "(default)";

/// Errors that can occur during Firestore operations.
#[derive(Error, Debug)]
pub enum FirestoreError {
    /// Wrapper for `reqwest::Error`.
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// Wrapper for `reqwest_middleware::Error`.
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    /// Errors returned by the Firestore API.
    #[error("API error: {0}")]
    ApiError(String),
    /// Wrapper for `serde_json::Error`.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Client for interacting with Cloud Firestore.
#[derive(Clone)]
pub struct FirebaseFirestore {
    client: ApiClient,
    api_url: String,
    database: String,
}

impl FirebaseFirestore {
    /// Creates a new `FirebaseFirestore` instance.
    ///
    /// This is typically called via `FirebaseApp::firestore()`. Requests carry the
    /// session's id token as a bearer token.
    pub fn new(session: Session, project_id: &str) -> Self {
        Self::new_with_url(session, FIRESTORE_V1_API.to_string(), project_id)
    }

    /// Creates a new `FirebaseFirestore` instance with a custom API root (the emulator, or tests).
    ///
    /// `api_url` is the part before `projects/...`, e.g. `http://localhost:8080/v1`.
    pub fn new_with_url(session: Session, api_url: String, project_id: &str) -> Self {
        let client = ApiClient::new(IdTokenMiddleware::new(session, TokenPlacement::Header("Bearer")));
        Self::new_with_client(client, api_url, project_id)
    }

    pub(crate) fn new_with_client(
        client: ApiClient,
        api_url: String,
        project_id: &str,
    ) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            database: format!("projects/{}/databases/{}", project_id, DEFAULT_DATABASE),
        }
    }

    /// The database resource name, `projects/{project_id}/databases/(default)`.
    pub fn database(&self) -> &str {
        &self.database
    }

    fn documents_root(&self) -> String {
        format!("{}/documents", self.database)
    }

    /// Gets a `CollectionReference` instance that refers to the collection at the specified path.
    ///
    /// # Arguments
    ///
    /// * `collection_path` - The slash-separated path of the collection (e.g., "tasks").
    pub fn collection(&self, collection_path: &str) -> CollectionReference {
        CollectionReference::new(
            self.client.clone(),
            self.api_url.clone(),
            format!("{}/{}", self.documents_root(), collection_path.trim_matches('/')),
        )
    }

    /// Gets a `DocumentReference` instance that refers to the document at the specified path.
    ///
    /// # Arguments
    ///
    /// * `document_path` - The slash-separated path to the document (e.g., "tasks/task1").
    pub fn doc(&self, document_path: &str) -> DocumentReference {
        DocumentReference::new(
            self.client.clone(),
            self.api_url.clone(),
            format!("{}/{}", self.documents_root(), document_path.trim_matches('/')),
        )
    }

    /// Creates a write batch, used for performing multiple writes as a single atomic operation.
    pub fn batch(&self) -> WriteBatch {
        WriteBatch::new(self.client.clone(), self.api_url.clone(), self.database.clone())
    }

    /// Creates an executable query from a query definition, run against the root of the database.
    ///
    /// # Arguments
    ///
    /// * `query` - The `Query` definition containing filters and the target collection.
    pub fn query(&self, query: Query) -> ExecutableQuery {
        ExecutableQuery::new(
            self.client.clone(),
            self.api_url.clone(),
            self.documents_root(),
            query,
        )
    }
}
