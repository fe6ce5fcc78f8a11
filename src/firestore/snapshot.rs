use super::models::Document;
use super::reference::{convert_value_to_serde_value, document_data, DocumentReference};
use super::FirestoreError;
use serde::de::DeserializeOwned;

/// A document as read at one point in time, or the fact that it was missing.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    pub(crate) reference: DocumentReference,
    pub(crate) document: Option<Document>,
    pub(crate) read_time: Option<String>,
}

impl DocumentSnapshot {
    pub(crate) fn missing(reference: DocumentReference) -> Self {
        Self {
            reference,
            document: None,
            read_time: None,
        }
    }

    pub(crate) fn from_document(
        reference: DocumentReference,
        document: Document,
        read_time: Option<String>,
    ) -> Self {
        Self {
            reference,
            document: Some(document),
            read_time,
        }
    }

    pub fn id(&self) -> &str {
        self.reference.id()
    }

    pub fn reference(&self) -> &DocumentReference {
        &self.reference
    }

    /// The raw document, if it exists.
    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.document.is_some()
    }

    pub fn create_time(&self) -> Option<&str> {
        self.document.as_ref().and_then(|d| d.create_time.as_deref())
    }

    pub fn update_time(&self) -> Option<&str> {
        self.document.as_ref().and_then(|d| d.update_time.as_deref())
    }

    pub fn read_time(&self) -> Option<&str> {
        self.read_time.as_deref()
    }

    /// Decodes the whole document into `T`; `None` for a missing document.
    pub fn data<T: DeserializeOwned>(&self) -> Result<Option<T>, FirestoreError> {
        self.document.as_ref().map(document_data::<T>).transpose()
    }

    /// Retrieves a field from the document. Dots separate the keys of nested maps
    /// (e.g., "address.city").
    pub fn get_field<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, FirestoreError> {
        let Some(document) = &self.document else {
            return Ok(None);
        };

        let mut segments = path.split('.');
        let Some(mut value) = segments.next().and_then(|first| document.fields.get(first)) else {
            return Ok(None);
        };
        for segment in segments {
            let super::models::ValueType::MapValue(map) = &value.value_type else {
                return Ok(None);
            };
            match map.fields.get(segment) {
                Some(next) => value = next,
                None => return Ok(None),
            }
        }

        let serde_value = convert_value_to_serde_value(value)?;
        Ok(Some(serde_json::from_value(serde_value)?))
    }
}

/// The results of one query run, in server order.
#[derive(Debug, Clone, Default)]
pub struct QuerySnapshot {
    pub(crate) documents: Vec<DocumentSnapshot>,
    pub(crate) read_time: Option<String>,
}

impl QuerySnapshot {
    pub fn documents(&self) -> &[DocumentSnapshot] {
        &self.documents
    }

    pub fn empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn size(&self) -> usize {
        self.documents.len()
    }

    pub fn read_time(&self) -> Option<&str> {
        self.read_time.as_deref()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DocumentSnapshot> {
        self.documents.iter()
    }
}

impl<'a> IntoIterator for &'a QuerySnapshot {
    type Item = &'a DocumentSnapshot;
    type IntoIter = std::slice::Iter<'a, DocumentSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.iter()
    }
}
