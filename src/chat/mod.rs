//! A single public chat room stored under `messages` in the Realtime Database.

#[cfg(test)]
mod tests;

use crate::database::listen::{apply_event, DatabaseEvent};
use crate::database::query::DatabaseQuery;
use crate::database::{DatabaseError, FirebaseDatabase};
use chrono::Utc;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const MESSAGES_PATH: &str = "messages";
pub const SENDER_ID: &str = "Anonymous User";
pub const RECEIVER_ID: &str = "ALL";
/// How many of the latest messages the room shows.
pub const HISTORY_LIMIT: u32 = 20;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyMessage,
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// The push key; not part of the stored value.
    #[serde(skip)]
    pub id: String,
    pub text: String,
    pub sender_id: String,
    pub receiver_id: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

#[derive(Clone)]
pub struct ChatRoom {
    database: FirebaseDatabase,
    path: String,
}

impl ChatRoom {
    pub fn new(database: FirebaseDatabase) -> Self {
        Self::with_path(database, MESSAGES_PATH)
    }

    pub fn with_path(database: FirebaseDatabase, path: &str) -> Self {
        Self {
            database,
            path: path.to_string(),
        }
    }

    fn history(&self) -> DatabaseQuery {
        self.database
            .reference(&self.path)
            .order_by_child("createdAt")
            .limit_to_last(HISTORY_LIMIT)
    }

    /// Posts `text` to the room. Surrounding whitespace is dropped and blank
    /// messages are rejected before anything is sent.
    pub async fn send(&self, text: &str) -> Result<ChatMessage, ChatError> {
        self.send_at(text, Utc::now().timestamp_millis()).await
    }

    pub(crate) async fn send_at(&self, text: &str, created_at: i64) -> Result<ChatMessage, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let mut message = ChatMessage {
            id: String::new(),
            text: text.to_string(),
            sender_id: SENDER_ID.to_string(),
            receiver_id: RECEIVER_ID.to_string(),
            created_at,
        };
        let reference = self.database.reference(&self.path).push(&message).await?;
        message.id = reference.key().unwrap_or_default().to_string();

        tracing::debug!(id = %message.id, "Chat message sent");
        Ok(message)
    }

    /// The latest messages, newest first.
    pub async fn recent(&self) -> Result<Vec<ChatMessage>, ChatError> {
        let value: Option<Value> = self.history().get().await?;
        Ok(value.map(|v| messages_from(&v)).unwrap_or_default())
    }

    /// Streams the latest messages, newest first, once per change in the room.
    ///
    /// The stream ends with an error when the server cancels the listener or
    /// revokes its credential.
    pub async fn subscribe(
        &self,
    ) -> Result<BoxStream<'static, Result<Vec<ChatMessage>, ChatError>>, ChatError> {
        let events = self.history().listen().await?;
        let mut tree = Value::Null;
        let mut closed = false;

        let stream = events.filter_map(move |event| {
            let item = if closed {
                None
            } else {
                match event {
                    Ok(DatabaseEvent::Cancel(reason)) => {
                        tracing::warn!(%reason, "Chat listener cancelled");
                        closed = true;
                        Some(Err(DatabaseError::ListenCancelled(reason).into()))
                    }
                    Ok(DatabaseEvent::AuthRevoked) => {
                        closed = true;
                        Some(Err(DatabaseError::AuthRevoked.into()))
                    }
                    Ok(event) => {
                        if apply_event(&mut tree, &event) {
                            Some(Ok(messages_from(&tree)))
                        } else {
                            None
                        }
                    }
                    Err(e) => Some(Err(e.into())),
                }
            };
            future::ready(item)
        });

        Ok(stream.boxed())
    }
}

/// Turns the `{key: message}` object under the room into a newest-first list.
fn messages_from(tree: &Value) -> Vec<ChatMessage> {
    let Value::Object(entries) = tree else {
        return Vec::new();
    };

    let mut messages: Vec<ChatMessage> = entries
        .iter()
        .filter_map(|(id, value)| {
            match serde_json::from_value::<ChatMessage>(value.clone()) {
                Ok(mut message) => {
                    message.id = id.clone();
                    Some(message)
                }
                Err(e) => {
                    tracing::warn!(%id, error = %e, "Skipping malformed chat message");
                    None
                }
            }
        })
        .collect();

    messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    messages.truncate(HISTORY_LIMIT as usize);
    messages
}
