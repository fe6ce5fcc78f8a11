use super::listen::{listen_request, EventStream};
use super::reference::DatabaseReference;
use super::DatabaseError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// The ordering a query filters on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderBy {
    Child(String),
    Key,
    Value,
}

impl OrderBy {
    /// The `orderBy` parameter; the REST API expects it JSON-quoted.
    fn param(&self) -> String {
        let name = match self {
            OrderBy::Child(child) => child.as_str(),
            OrderBy::Key => "$key",
            OrderBy::Value => "$value",
        };
        Value::String(name.to_string()).to_string()
    }
}

/// A filtered, ordered read of a location.
///
/// The REST API applies ordering only to choose which children are
/// returned; the result is still a JSON object, so callers sort it
/// themselves.
#[derive(Clone)]
pub struct DatabaseQuery {
    reference: DatabaseReference,
    order_by: OrderBy,
    limit_to_first: Option<u32>,
    limit_to_last: Option<u32>,
    start_at: Option<Value>,
    end_at: Option<Value>,
    equal_to: Option<Value>,
}

impl DatabaseQuery {
    pub(crate) fn new(reference: DatabaseReference, order_by: OrderBy) -> Self {
        Self {
            reference,
            order_by,
            limit_to_first: None,
            limit_to_last: None,
            start_at: None,
            end_at: None,
            equal_to: None,
        }
    }

    pub fn reference(&self) -> &DatabaseReference {
        &self.reference
    }

    pub fn limit_to_first(mut self, limit: u32) -> Self {
        self.limit_to_first = Some(limit);
        self
    }

    pub fn limit_to_last(mut self, limit: u32) -> Self {
        self.limit_to_last = Some(limit);
        self
    }

    pub fn start_at<T: Serialize>(mut self, value: T) -> Result<Self, DatabaseError> {
        self.start_at = Some(serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn end_at<T: Serialize>(mut self, value: T) -> Result<Self, DatabaseError> {
        self.end_at = Some(serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn equal_to<T: Serialize>(mut self, value: T) -> Result<Self, DatabaseError> {
        self.equal_to = Some(serde_json::to_value(value)?);
        Ok(self)
    }

    pub(crate) fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("orderBy", self.order_by.param())];
        if let Some(limit) = self.limit_to_first {
            params.push(("limitToFirst", limit.to_string()));
        }
        if let Some(limit) = self.limit_to_last {
            params.push(("limitToLast", limit.to_string()));
        }
        if let Some(value) = &self.start_at {
            params.push(("startAt", value.to_string()));
        }
        if let Some(value) = &self.end_at {
            params.push(("endAt", value.to_string()));
        }
        if let Some(value) = &self.equal_to {
            params.push(("equalTo", value.to_string()));
        }
        params
    }

    /// Runs the query. Returns `Ok(None)` when nothing matches.
    pub async fn get<T: DeserializeOwned>(&self) -> Result<Option<T>, DatabaseError> {
        self.reference.get_with(&self.params()).await
    }

    /// Streams changes to the children matched by the query.
    pub async fn listen(&self) -> Result<EventStream, DatabaseError> {
        listen_request(&self.reference.client, &self.reference.url(), &self.params()).await
    }
}
