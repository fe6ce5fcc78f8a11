use super::listen::{listen_request, ListenStream};
use super::models::{
    CollectionSelector, CompositeFilter, CompositeOperator, Direction, FieldFilter, FieldOperator,
    FieldReference, Filter, ListenRequest, Order, QueryTarget, RunQueryRequest, RunQueryResponse,
    StructuredQuery, Target, TargetType,
};
use super::reference::{
    convert_serde_value_to_firestore_value, database_of, DocumentReference, LISTEN_TARGET_ID,
};
use super::snapshot::{DocumentSnapshot, QuerySnapshot};
use super::FirestoreError;
use crate::core::parse_error_response;
use reqwest::header;
use crate::core::ApiClient;
use serde::Serialize;

/// A structured query over one collection, not yet bound to a client.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub(crate) query: StructuredQuery,
}

impl Query {
    /// Selects every document of `collection_id`.
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            query: StructuredQuery {
                from: vec![CollectionSelector {
                    collection_id: collection_id.into(),
                    all_descendants: None,
                }],
                ..Default::default()
            },
        }
    }

    pub fn structured_query(&self) -> &StructuredQuery {
        &self.query
    }

    /// Adds a filter to the query. Filters are combined with `AND`.
    pub fn where_filter<T: Serialize>(
        mut self,
        field: &str,
        op: FieldOperator,
        value: T,
    ) -> Result<Self, FirestoreError> {
        let value = convert_serde_value_to_firestore_value(serde_json::to_value(value)?)?;
        let filter = Filter::FieldFilter(FieldFilter {
            field: FieldReference {
                field_path: field.to_string(),
            },
            op,
            value,
        });

        self.query.where_clause = Some(match self.query.where_clause.take() {
            None => filter,
            Some(Filter::CompositeFilter(mut composite))
                if composite.op == CompositeOperator::And =>
            {
                composite.filters.push(filter);
                Filter::CompositeFilter(composite)
            }
            Some(existing) => Filter::CompositeFilter(CompositeFilter {
                op: CompositeOperator::And,
                filters: vec![existing, filter],
            }),
        });

        Ok(self)
    }

    /// Appends a sort key; earlier keys take precedence.
    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.query.order_by.push(Order {
            field: FieldReference {
                field_path: field.to_string(),
            },
            direction,
        });
        self
    }

    /// Returns at most `limit` documents.
    pub fn limit(mut self, limit: i32) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Skips the first `offset` matches.
    pub fn offset(mut self, offset: i32) -> Self {
        self.query.offset = Some(offset);
        self
    }
}

/// A `Query` bound to a client and a parent document, so it can be run or listened to.
#[derive(Clone)]
pub struct ExecutableQuery {
    pub(crate) client: ApiClient,
    pub(crate) api_url: String,
    /// Resource name of the document (or database root) the queried collection lives under.
    pub(crate) parent: String,
    pub(crate) query: Query,
}

impl ExecutableQuery {
    pub(crate) fn new(
        client: ApiClient,
        api_url: String,
        parent: String,
        query: Query,
    ) -> Self {
        Self {
            client,
            api_url,
            parent,
            query,
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Adds a filter to the query.
    pub fn where_filter<T: Serialize>(
        self,
        field: &str,
        op: FieldOperator,
        value: T,
    ) -> Result<Self, FirestoreError> {
        Ok(Self {
            query: self.query.where_filter(field, op, value)?,
            ..self
        })
    }

    /// Sorts the query results.
    pub fn order_by(self, field: &str, direction: Direction) -> Self {
        Self {
            query: self.query.order_by(field, direction),
            ..self
        }
    }

    /// Limits the results.
    pub fn limit(self, limit: i32) -> Self {
        Self {
            query: self.query.limit(limit),
            ..self
        }
    }

    /// Offsets the results.
    pub fn offset(self, offset: i32) -> Self {
        Self {
            query: self.query.offset(offset),
            ..self
        }
    }

    /// Runs the query once (`:runQuery`).
    pub async fn get(&self) -> Result<QuerySnapshot, FirestoreError> {
        let url = format!("{}/{}:runQuery", self.api_url, self.parent);

        let request = RunQueryRequest {
            structured_query: self.query.query.clone(),
        };

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FirestoreError::ApiError(
                parse_error_response(response, "Run query failed").await,
            ));
        }

        let responses: Vec<RunQueryResponse> = response.json().await?;

        let mut snapshot = QuerySnapshot::default();
        for res in responses {
            if res.read_time.is_some() {
                snapshot.read_time = res.read_time;
            }

            if let Some(document) = res.document {
                let reference = DocumentReference::new(
                    self.client.clone(),
                    self.api_url.clone(),
                    document.name.clone(),
                );
                snapshot.documents.push(DocumentSnapshot::from_document(
                    reference,
                    document,
                    snapshot.read_time.clone(),
                ));
            }
        }

        Ok(snapshot)
    }

    /// Opens a listen stream whose target is this query.
    pub async fn listen(&self) -> Result<ListenStream, FirestoreError> {
        let database = database_of(&self.parent).to_string();

        let request = ListenRequest {
            database: database.clone(),
            add_target: Some(Target {
                target_type: TargetType::Query(QueryTarget {
                    parent: self.parent.clone(),
                    structured_query: self.query.query.clone(),
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
