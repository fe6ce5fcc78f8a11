use super::models::{
    CommitRequest, CommitResponse, Document, DocumentMask, FieldTransform, Precondition,
    ServerValue, Write, WriteOperation, WriteResult,
};
use super::reference::convert_serializable_to_fields;
use super::FirestoreError;
use crate::core::parse_error_response;
use reqwest::header;
use crate::core::ApiClient;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Represents a Firestore Write Batch.
///
/// A set of writes that is committed atomically: either every write is applied or none is.
///
/// # Examples
///
/// ```rust,no_run
/// # use firebase_showcase::FirebaseApp;
/// # use serde_json::json;
/// # async fn run(app: FirebaseApp) -> Result<(), Box<dyn std::error::Error>> {
/// # let firestore = app.firestore();
/// let batch = firestore.batch();
///
/// batch.create_with_server_timestamps("tasks/t1", &json!({"title": "Buy milk"}), &["createdAt"])?;
/// batch.update("tasks/t2", &json!({"completed": true}))?;
/// batch.delete("tasks/t3")?;
/// batch.commit().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WriteBatch {
    client: ApiClient,
    api_url: String,
    database: String,
    writes: Arc<Mutex<Vec<Write>>>,
}

impl WriteBatch {
    pub(crate) fn new(client: ApiClient, api_url: String, database: String) -> Self {
        Self {
            client,
            api_url,
            database,
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn writes(&self) -> MutexGuard<'_, Vec<Write>> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resource_name(&self, document_path: &str) -> String {
        format!("{}/documents/{}", self.database, document_path.trim_matches('/'))
    }

    fn push_update<T: Serialize>(
        &self,
        document_path: &str,
        value: &T,
        masked: bool,
        current_document: Option<Precondition>,
        timestamp_fields: &[&str],
    ) -> Result<&Self, FirestoreError> {
        let fields = convert_serializable_to_fields(value)?;

        let update_mask = masked.then(|| {
            let mut field_paths: Vec<String> = fields.keys().cloned().collect();
            field_paths.sort();
            DocumentMask { field_paths }
        });

        let update_transforms = (!timestamp_fields.is_empty()).then(|| {
            timestamp_fields
                .iter()
                .map(|field| FieldTransform {
                    field_path: field.to_string(),
                    set_to_server_value: ServerValue::RequestTime,
                })
                .collect()
        });

        let write = Write {
            operation: WriteOperation::Update(Document {
                name: self.resource_name(document_path),
                fields,
                create_time: None,
                update_time: None,
            }),
            update_mask,
            update_transforms,
            current_document,
        };

        self.writes().push(write);
        Ok(self)
    }

    /// Overwrites the document referred to by `document_path`.
    ///
    /// If the document does not exist, it will be created. If it does exist, it will be overwritten.
    pub fn set<T: Serialize>(&self, document_path: &str, value: &T) -> Result<&Self, FirestoreError> {
        self.push_update(document_path, value, false, None, &[])
    }

    /// Like `set`, additionally stamping each of `timestamp_fields` with the commit time.
    pub fn set_with_server_timestamps<T: Serialize>(
        &self,
        document_path: &str,
        value: &T,
        timestamp_fields: &[&str],
    ) -> Result<&Self, FirestoreError> {
        self.push_update(document_path, value, false, None, timestamp_fields)
    }

    /// Updates fields in the document referred to by `document_path`.
    ///
    /// If the document does not exist, the operation will fail.
    pub fn update<T: Serialize>(
        &self,
        document_path: &str,
        value: &T,
    ) -> Result<&Self, FirestoreError> {
        let precondition = Precondition {
            exists: Some(true),
            update_time: None,
        };
        self.push_update(document_path, value, true, Some(precondition), &[])
    }

    /// Creates a document at the given path.
    ///
    /// If the document already exists, the operation will fail.
    pub fn create<T: Serialize>(
        &self,
        document_path: &str,
        value: &T,
    ) -> Result<&Self, FirestoreError> {
        self.create_with_server_timestamps(document_path, value, &[])
    }

    /// Like `create`, additionally stamping each of `timestamp_fields` with the commit time.
    pub fn create_with_server_timestamps<T: Serialize>(
        &self,
        document_path: &str,
        value: &T,
        timestamp_fields: &[&str],
    ) -> Result<&Self, FirestoreError> {
        let precondition = Precondition {
            exists: Some(false),
            update_time: None,
        };
        self.push_update(document_path, value, false, Some(precondition), timestamp_fields)
    }

    /// Deletes the document referred to by `document_path`.
    pub fn delete(&self, document_path: &str) -> Result<&Self, FirestoreError> {
        let write = Write {
            operation: WriteOperation::Delete(self.resource_name(document_path)),
            update_mask: None,
            update_transforms: None,
            current_document: None,
        };

        self.writes().push(write);
        Ok(self)
    }

    /// Number of writes waiting to be committed.
    pub fn len(&self) -> usize {
        self.writes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes().is_empty()
    }

    /// Commits the batch of writes. The batch is empty afterwards, whatever the outcome.
    ///
    /// The commit is sent once and never retried: a replayed `create` would
    /// fail on the document the first attempt already wrote.
    pub async fn commit(&self) -> Result<Vec<WriteResult>, FirestoreError> {
        let writes = std::mem::take(&mut *self.writes());

        if writes.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/{}/documents:commit", self.api_url, self.database);
        let request = CommitRequest { writes };

        let response = self
            .client
            .once()
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FirestoreError::ApiError(
                parse_error_response(response, "Commit batch failed").await,
            ));
        }

        let result: CommitResponse = response.json().await?;
        Ok(result.write_results)
    }
}
