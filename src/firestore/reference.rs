use super::listen::{listen_request, ListenStream};
use super::models::{
    ArrayValue, Direction, Document, DocumentsTarget, FieldOperator, ListDocumentsResponse,
    ListenRequest, MapValue, Target, TargetType, Value, ValueType,
};
use super::query::{ExecutableQuery, Query};
use super::snapshot::DocumentSnapshot;
use super::FirestoreError;
use crate::core::parse_error_response;
use reqwest::header;
use crate::core::ApiClient;
use serde::de::{DeserializeOwned, Error as _};
use serde::Serialize;
use serde_json::map::Map;
use serde_json::Value as SerdeValue;
use std::collections::HashMap;

/// Target id used for single-target listeners.
pub(crate) const LISTEN_TARGET_ID: i32 = 1;

fn custom_error(message: String) -> FirestoreError {
    FirestoreError::SerializationError(serde_json::Error::custom(message))
}

pub(crate) fn convert_fields_to_serde_value(
    fields: &HashMap<String, Value>,
) -> Result<SerdeValue, FirestoreError> {
    let mut map = Map::new();
    for (key, value) in fields {
        map.insert(key.clone(), convert_value_to_serde_value(value)?);
    }
    Ok(SerdeValue::Object(map))
}

/// Timestamps, bytes and references come back as their string forms.
pub(crate) fn convert_value_to_serde_value(value: &Value) -> Result<SerdeValue, FirestoreError> {
    Ok(match &value.value_type {
        ValueType::StringValue(s)
        | ValueType::TimestampValue(s)
        | ValueType::BytesValue(s)
        | ValueType::ReferenceValue(s) => SerdeValue::String(s.clone()),
        ValueType::IntegerValue(s) => {
            let i: i64 = s
                .parse()
                .map_err(|e| custom_error(format!("Invalid integer value '{}': {}", s, e)))?;
            SerdeValue::Number(i.into())
        }
        ValueType::DoubleValue(d) => serde_json::Number::from_f64(*d)
            .map(SerdeValue::Number)
            .ok_or_else(|| custom_error(format!("Invalid double value: {}", d)))?,
        ValueType::BooleanValue(b) => SerdeValue::Bool(*b),
        ValueType::MapValue(map_value) => convert_fields_to_serde_value(&map_value.fields)?,
        ValueType::ArrayValue(array_value) => SerdeValue::Array(
            array_value
                .values
                .iter()
                .map(convert_value_to_serde_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        ValueType::NullValue(_) => SerdeValue::Null,
        ValueType::GeoPointValue(gp) => {
            serde_json::json!({ "latitude": gp.latitude, "longitude": gp.longitude })
        }
    })
}

/// Serializes `value` into document fields. Only structs and maps can be documents.
pub(crate) fn convert_serializable_to_fields<T: Serialize>(
    value: &T,
) -> Result<HashMap<String, Value>, FirestoreError> {
    match serde_json::to_value(value)? {
        SerdeValue::Object(map) => map
            .into_iter()
            .map(|(k, v)| -> Result<(String, Value), FirestoreError> {
                Ok((k, convert_serde_value_to_firestore_value(v)?))
            })
            .collect(),
        _ => Err(custom_error("Can only set objects as documents".to_string())),
    }
}

pub(crate) fn convert_serde_value_to_firestore_value(
    value: SerdeValue,
) -> Result<Value, FirestoreError> {
    let value_type = match value {
        SerdeValue::Null => ValueType::NullValue(()),
        SerdeValue::Bool(b) => ValueType::BooleanValue(b),
        SerdeValue::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => ValueType::IntegerValue(i.to_string()),
            (None, Some(f)) => ValueType::DoubleValue(f),
            _ => return Err(custom_error(format!("Unsupported number: {}", n))),
        },
        SerdeValue::String(s) => ValueType::StringValue(s),
        SerdeValue::Array(a) => ValueType::ArrayValue(ArrayValue {
            values: a
                .into_iter()
                .map(convert_serde_value_to_firestore_value)
                .collect::<Result<Vec<_>, _>>()?,
        }),
        SerdeValue::Object(o) => ValueType::MapValue(MapValue {
            fields: o
                .into_iter()
                .map(|(k, v)| -> Result<(String, Value), FirestoreError> {
                    Ok((k, convert_serde_value_to_firestore_value(v)?))
                })
                .collect::<Result<HashMap<_, _>, _>>()?,
        }),
    };
    Ok(Value { value_type })
}

/// Deserializes the fields of a document into `T`.
pub(crate) fn document_data<T: DeserializeOwned>(document: &Document) -> Result<T, FirestoreError> {
    let serde_value = convert_fields_to_serde_value(&document.fields)?;
    Ok(serde_json::from_value(serde_value)?)
}

/// `projects/p/databases/d/documents/a/b` -> `projects/p/databases/d`.
pub(crate) fn database_of(name: &str) -> &str {
    name.split("/documents").next().unwrap_or(name)
}

fn split_parent(name: &str) -> (&str, &str) {
    name.rsplit_once('/').unwrap_or(("", name))
}

/// A reference to a single document.
#[derive(Clone)]
pub struct DocumentReference {
    pub(crate) client: ApiClient,
    pub(crate) api_url: String,
    pub(crate) name: String,
}

impl std::fmt::Debug for DocumentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentReference")
            .field("name", &self.name)
            .finish()
    }
}

impl DocumentReference {
    pub(crate) fn new(client: ApiClient, api_url: String, name: String) -> Self {
        Self {
            client,
            api_url,
            name,
        }
    }

    pub fn id(&self) -> &str {
        split_parent(&self.name).1
    }

    /// The full resource name, `projects/{p}/databases/{d}/documents/{path}`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> CollectionReference {
        CollectionReference::new(
            self.client.clone(),
            self.api_url.clone(),
            split_parent(&self.name).0.to_string(),
        )
    }

    /// A subcollection of this document.
    pub fn collection(&self, collection_id: &str) -> CollectionReference {
        CollectionReference::new(
            self.client.clone(),
            self.api_url.clone(),
            format!("{}/{}", self.name, collection_id),
        )
    }

    fn url(&self) -> String {
        format!("{}/{}", self.api_url, self.name)
    }

    /// Reads the document. Returns `Ok(None)` if it does not exist.
    pub async fn get<T: DeserializeOwned>(&self) -> Result<Option<T>, FirestoreError> {
        self.snapshot().await?.data()
    }

    pub async fn snapshot(&self) -> Result<DocumentSnapshot, FirestoreError> {
        let response = self.client.get(self.url()).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(DocumentSnapshot::missing(self.clone()));
        }

        if !response.status().is_success() {
            return Err(FirestoreError::ApiError(
                parse_error_response(response, "Get document failed").await,
            ));
        }

        let document: Document = response.json().await?;
        Ok(DocumentSnapshot::from_document(self.clone(), document, None))
    }

    /// Writes the document, replacing any existing fields.
    pub async fn set<T: Serialize>(&self, value: &T) -> Result<Document, FirestoreError> {
        self.patch(value, &[], "Set document failed").await
    }

    /// Writes only the fields named in `update_mask`, or every field of `value`
    /// when no mask is given. Fields in the mask but missing from `value` are deleted.
    pub async fn update<T: Serialize>(
        &self,
        value: &T,
        update_mask: Option<Vec<String>>,
    ) -> Result<Document, FirestoreError> {
        let mask = match update_mask {
            Some(mask) => mask,
            None => {
                let mut keys: Vec<String> =
                    convert_serializable_to_fields(value)?.into_keys().collect();
                keys.sort();
                keys
            }
        };
        let params: Vec<(&str, String)> = mask
            .into_iter()
            .map(|field| ("updateMask.fieldPaths", field))
            .collect();
        self.patch(value, &params, "Update document failed").await
    }

    async fn patch<T: Serialize>(
        &self,
        value: &T,
        params: &[(&str, String)],
        default_msg: &str,
    ) -> Result<Document, FirestoreError> {
        let fields = convert_serializable_to_fields(value)?;
        let body = serde_json::to_vec(&serde_json::json!({ "fields": fields }))?;

        let response = self
            .client
            .patch(self.url())
            .query(params)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FirestoreError::ApiError(
                parse_error_response(response, default_msg).await,
            ));
        }

        Ok(response.json().await?)
    }

    pub async fn delete(&self) -> Result<(), FirestoreError> {
        let response = self.client.delete(self.url()).send().await?;

        if !response.status().is_success() {
            return Err(FirestoreError::ApiError(
                parse_error_response(response, "Delete document failed").await,
            ));
        }

        Ok(())
    }

    /// Listens to changes to this document.
    pub async fn listen(&self) -> Result<ListenStream, FirestoreError> {
        let database = database_of(&self.name).to_string();
        let request = ListenRequest {
            database: database.clone(),
            add_target: Some(Target {
                target_type: TargetType::Documents(DocumentsTarget {
                    documents: vec![self.name.clone()],
                }),
                target_id: Some(LISTEN_TARGET_ID),
                resume_token: None,
                once: None,
            }),
            remove_target: None,
        };

        listen_request(&self.client, &format!("{}/{}", self.api_url, database), &request).await
    }
}

/// A reference to a collection of documents.
#[derive(Clone)]
pub struct CollectionReference {
    pub(crate) client: ApiClient,
    pub(crate) api_url: String,
    pub(crate) name: String,
}

impl std::fmt::Debug for CollectionReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionReference")
            .field("name", &self.name)
            .finish()
    }
}

impl CollectionReference {
    pub(crate) fn new(client: ApiClient, api_url: String, name: String) -> Self {
        Self {
            client,
            api_url,
            name,
        }
    }

    pub fn id(&self) -> &str {
        split_parent(&self.name).1
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self, document_id: &str) -> DocumentReference {
        DocumentReference::new(
            self.client.clone(),
            self.api_url.clone(),
            format!("{}/{}", self.name, document_id),
        )
    }

    fn url(&self) -> String {
        format!("{}/{}", self.api_url, self.name)
    }

    /// Lists every document in the collection, following page tokens.
    pub async fn list_documents(&self) -> Result<Vec<Document>, FirestoreError> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(self.url());
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let response = request.send().await?;

            if !response.status().is_success() {
                return Err(FirestoreError::ApiError(
                    parse_error_response(response, "List documents failed").await,
                ));
            }

            let page: ListDocumentsResponse = response.json().await?;
            documents.extend(page.documents);

            match page.next_page_token {
                Some(token) if !token.is_empty() && page_token.as_ref() != Some(&token) => {
                    page_token = Some(token)
                }
                _ => break,
            }
        }

        Ok(documents)
    }

    /// Creates a document with a server-assigned id.
    pub async fn add<T: Serialize>(&self, value: &T) -> Result<Document, FirestoreError> {
        let fields = convert_serializable_to_fields(value)?;
        let body = serde_json::to_vec(&serde_json::json!({ "fields": fields }))?;

        let response = self
            .client
            .once()
            .post(self.url())
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FirestoreError::ApiError(
                parse_error_response(response, "Add document failed").await,
            ));
        }

        Ok(response.json().await?)
    }

    /// A query over this collection with no constraints yet.
    pub fn query(&self) -> ExecutableQuery {
        ExecutableQuery::new(
            self.client.clone(),
            self.api_url.clone(),
            split_parent(&self.name).0.to_string(),
            Query::new(self.id()),
        )
    }

    pub fn where_filter<T: Serialize>(
        &self,
        field: &str,
        op: FieldOperator,
        value: T,
    ) -> Result<ExecutableQuery, FirestoreError> {
        self.query().where_filter(field, op, value)
    }

    pub fn order_by(&self, field: &str, direction: Direction) -> ExecutableQuery {
        self.query().order_by(field, direction)
    }

    pub fn limit(&self, limit: i32) -> ExecutableQuery {
        self.query().limit(limit)
    }
}
