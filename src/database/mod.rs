//! Firebase Realtime Database module.
//!
//! This module talks to the Realtime Database REST API: every location is a
//! JSON document at `<database_url>/<path>.json`. Reads, writes, pushes and
//! filtered queries are plain HTTP calls; live updates are delivered as
//! server-sent events (see [`listen`]).
//!
//! # Examples
//!
//! ```rust,ignore
//! # use firebase_showcase::FirebaseApp;
//! # async fn run(app: FirebaseApp) -> Result<(), Box<dyn std::error::Error>> {
//! let db = app.database();
//! let key = db.reference("messages").push(&serde_json::json!({ "text": "hi" })).await?;
//! let latest = db
//!     .reference("messages")
//!     .order_by_child("createdAt")
//!     .limit_to_last(20)
//!     .get::<serde_json::Value>()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod listen;
pub mod query;
pub mod reference;

#[cfg(test)]
mod tests;

use crate::core::middleware::{IdTokenMiddleware, TokenPlacement};
use crate::core::{ApiClient, FirebaseErrorResponse, Session};
use reference::DatabaseReference;
use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur during Realtime Database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Wrapper for `reqwest::Error`.
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// Wrapper for `reqwest_middleware::Error`.
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    /// Errors returned by the Realtime Database API.
    #[error("API error: {0}")]
    ApiError(String),
    /// Wrapper for `serde_json::Error`.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    /// The server closed a listener, usually because security rules no longer allow the read.
    #[error("Listener cancelled: {0}")]
    ListenCancelled(String),
    /// The credential used by a listener expired or was revoked.
    #[error("Listener credential revoked")]
    AuthRevoked,
}

/// Client for the Firebase Realtime Database.
#[derive(Clone)]
pub struct FirebaseDatabase {
    client: ApiClient,
    base_url: String,
}

impl FirebaseDatabase {
    /// Creates a new `FirebaseDatabase` instance.
    ///
    /// This is typically called via `FirebaseApp::database()`. Requests carry
    /// the session's id token as the `auth` query parameter.
    pub fn new(session: Session, database_url: String) -> Self {
        let client = ApiClient::new(IdTokenMiddleware::new(session, TokenPlacement::Query("auth")));
        Self::new_with_client(client, database_url)
    }

    pub(crate) fn new_with_client(client: ApiClient, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Gets a `DatabaseReference` for the location at `path` (e.g. "messages").
    pub fn reference(&self, path: &str) -> DatabaseReference {
        DatabaseReference::new(self.client.clone(), self.base_url.clone(), path)
    }
}

/// The database answers with `{"error": "<message>"}` rather than the Google
/// API error envelope the other services use.
#[derive(Deserialize)]
struct DatabaseErrorBody {
    error: String,
}

pub(crate) async fn parse_database_error(response: reqwest::Response, default_msg: &str) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if let Ok(parsed) = serde_json::from_str::<DatabaseErrorBody>(&body) {
        return format!("{} ({})", parsed.error, status);
    }
    match serde_json::from_str::<FirebaseErrorResponse>(&body) {
        Ok(parsed) => parsed.display_message(),
        Err(_) => format!("{}: {}", default_msg, status),
    }
}
