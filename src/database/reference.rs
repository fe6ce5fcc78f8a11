use super::listen::{listen_request, EventStream};
use super::query::{DatabaseQuery, OrderBy};
use super::{parse_database_error, DatabaseError};
use reqwest::header;
use crate::core::ApiClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

/// A location in the database.
#[derive(Clone)]
pub struct DatabaseReference {
    pub(crate) client: ApiClient,
    pub(crate) base_url: String,
    pub(crate) path: String,
}

impl DatabaseReference {
    pub(crate) fn new(client: ApiClient, base_url: String, path: &str) -> Self {
        Self {
            client,
            base_url,
            path: normalize(path),
        }
    }

    /// The slash-separated path of this location; empty for the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The last path segment, or `None` for the root.
    pub fn key(&self) -> Option<&str> {
        if self.path.is_empty() {
            None
        } else {
            self.path.rsplit('/').next()
        }
    }

    pub fn child(&self, path: &str) -> DatabaseReference {
        let child = normalize(path);
        let path = match (self.path.is_empty(), child.is_empty()) {
            (true, _) => child,
            (false, true) => self.path.clone(),
            (false, false) => format!("{}/{}", self.path, child),
        };
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            path,
        }
    }

    pub(crate) fn url(&self) -> String {
        format!("{}/{}.json", self.base_url, self.path)
    }

    /// Reads the value at this location. Returns `Ok(None)` when nothing is stored there.
    pub async fn get<T: DeserializeOwned>(&self) -> Result<Option<T>, DatabaseError> {
        self.get_with(&[]).await
    }

    pub(crate) async fn get_with<T: DeserializeOwned>(
        &self,
        params: &[(&str, String)],
    ) -> Result<Option<T>, DatabaseError> {
        let response = self.client.get(self.url()).query(params).send().await?;

        if !response.status().is_success() {
            return Err(DatabaseError::ApiError(
                parse_database_error(response, "Get value failed").await,
            ));
        }

        let value: Value = response.json().await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    /// Replaces the value at this location.
    pub async fn set<T: Serialize>(&self, value: &T) -> Result<(), DatabaseError> {
        let response = self
            .client
            .put(self.url())
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(value)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DatabaseError::ApiError(
                parse_database_error(response, "Set value failed").await,
            ));
        }

        Ok(())
    }

    /// Appends `value` under a new chronologically ordered key and returns
    /// a reference to it. Sent once: a replayed push would create a second child.
    pub async fn push<T: Serialize>(&self, value: &T) -> Result<DatabaseReference, DatabaseError> {
        let response = self
            .client
            .once()
            .post(self.url())
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(value)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DatabaseError::ApiError(
                parse_database_error(response, "Push value failed").await,
            ));
        }

        let result: PushResponse = response.json().await?;
        Ok(self.child(&result.name))
    }

    /// Merges the given children into the value at this location.
    pub async fn update<T: Serialize>(&self, value: &T) -> Result<(), DatabaseError> {
        let response = self
            .client
            .patch(self.url())
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(value)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DatabaseError::ApiError(
                parse_database_error(response, "Update value failed").await,
            ));
        }

        Ok(())
    }

    pub async fn remove(&self) -> Result<(), DatabaseError> {
        let response = self.client.delete(self.url()).send().await?;

        if !response.status().is_success() {
            return Err(DatabaseError::ApiError(
                parse_database_error(response, "Remove value failed").await,
            ));
        }

        Ok(())
    }

    pub fn order_by_child(&self, child: &str) -> DatabaseQuery {
        DatabaseQuery::new(self.clone(), OrderBy::Child(child.to_string()))
    }

    pub fn order_by_key(&self) -> DatabaseQuery {
        DatabaseQuery::new(self.clone(), OrderBy::Key)
    }

    pub fn order_by_value(&self) -> DatabaseQuery {
        DatabaseQuery::new(self.clone(), OrderBy::Value)
    }

    /// Streams every change below this location.
    pub async fn listen(&self) -> Result<EventStream, DatabaseError> {
        listen_request(&self.client, &self.url(), &[]).await
    }
}

fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
