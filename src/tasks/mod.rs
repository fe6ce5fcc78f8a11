//! A shared to-do list kept in the `tasks` Firestore collection.


use crate::firestore::models::{Direction, Document, ListenResponse, TargetChangeType, ValueType};
use crate::firestore::query::ExecutableQuery;
use crate::firestore::reference::document_data;
use crate::firestore::{FirebaseFirestore, FirestoreError};
use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

pub const TASKS_COLLECTION: &str = "tasks";
const CREATED_AT: &str = "createdAt";

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task title is empty")]
    EmptyTitle,
    #[error(transparent)]
    Firestore(#[from] FirestoreError),
    #[error("Task listener closed by the server: {0}")]
    ListenClosed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(skip)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    /// Set by the server on commit; `None` until the write is acknowledged.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Task {
    fn from_document(document: &Document) -> Result<Self, FirestoreError> {
        let mut task: Task = document_data(document)?;
        task.id = document.id().to_string();
        Ok(task)
    }
}

#[derive(Serialize)]
struct NewTask<'a> {
    title: &'a str,
    completed: bool,
}

/// Newest first; tasks still waiting for their server timestamp count as newest.
fn newest_first(a: &Task, b: &Task) -> Ordering {
    match (&a.created_at, &b.created_at) {
        (None, None) => a.id.cmp(&b.id),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => y.cmp(x).then_with(|| a.id.cmp(&b.id)),
    }
}

fn sorted(tasks: &HashMap<String, Task>) -> Vec<Task> {
    let mut list: Vec<Task> = tasks.values().cloned().collect();
    list.sort_by(newest_first);
    list
}

#[derive(Clone)]
pub struct TaskList {
    firestore: FirebaseFirestore,
    collection: String,
}

impl TaskList {
    pub fn new(firestore: FirebaseFirestore) -> Self {
        Self::with_collection(firestore, TASKS_COLLECTION)
    }

    pub fn with_collection(firestore: FirebaseFirestore, collection: &str) -> Self {
        Self {
            firestore,
            collection: collection.to_string(),
        }
    }

    fn ordered(&self) -> ExecutableQuery {
        self.firestore
            .collection(&self.collection)
            .order_by(CREATED_AT, Direction::Descending)
    }

    /// Adds an open task. The title is trimmed and must not be blank; `createdAt`
    /// is stamped by the server.
    pub async fn add(&self, title: &str) -> Result<Task, TaskError> {
        self.add_with_id(&uuid::Uuid::new_v4().simple().to_string(), title)
            .await
    }

    pub(crate) async fn add_with_id(&self, id: &str, title: &str) -> Result<Task, TaskError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(TaskError::EmptyTitle);
        }

        let batch = self.firestore.batch();
        batch.create_with_server_timestamps(
            &format!("{}/{}", self.collection, id),
            &NewTask {
                title,
                completed: false,
            },
            &[CREATED_AT],
        )?;
        let results = batch.commit().await?;

        let created_at = results
            .first()
            .and_then(|result| result.transform_results.first())
            .and_then(|value| match &value.value_type {
                ValueType::TimestampValue(ts) => DateTime::parse_from_rfc3339(ts).ok(),
                _ => None,
            })
            .map(|ts| ts.with_timezone(&Utc));

        tracing::debug!(%id, "Task added");
        Ok(Task {
            id: id.to_string(),
            title: title.to_string(),
            completed: false,
            created_at,
        })
    }

    /// Flips a task; `completed` is the state the caller currently shows.
    pub async fn toggle(&self, id: &str, completed: bool) -> Result<(), TaskError> {
        self.firestore
            .collection(&self.collection)
            .doc(id)
            .update(
                &serde_json::json!({ "completed": !completed }),
                Some(vec!["completed".to_string()]),
            )
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), TaskError> {
        self.firestore
            .collection(&self.collection)
            .doc(id)
            .delete()
            .await?;
        Ok(())
    }

    /// All tasks, newest first.
    pub async fn list(&self) -> Result<Vec<Task>, TaskError> {
        let snapshot = self.ordered().get().await?;
        snapshot
            .iter()
            .filter_map(|doc| doc.document())
            .map(|doc| Task::from_document(doc).map_err(TaskError::from))
            .collect()
    }

    /// Streams the whole list, newest first, each time it changes.
    ///
    /// The first list is yielded once the server reports the initial state as
    /// complete. The stream ends after an error from the server.
    pub async fn watch(&self) -> Result<BoxStream<'static, Result<Vec<Task>, TaskError>>, TaskError> {
        let responses = self.ordered().listen().await?;
        let mut view = TaskView::default();
        let mut closed = false;

        let stream = responses.filter_map(move |response| {
            let item = if closed {
                None
            } else {
                let result = response
                    .map_err(TaskError::from)
                    .and_then(|response| view.apply(response));
                closed = result.is_err();
                result.transpose()
            };
            future::ready(item)
        });

        Ok(stream.boxed())
    }
}

/// Local copy of the listened collection, rebuilt from listen responses.
#[derive(Debug, Default)]
struct TaskView {
    tasks: HashMap<String, Task>,
    current: bool,
}

impl TaskView {
    /// Returns the new list when the response changed a consistent view.
    fn apply(&mut self, response: ListenResponse) -> Result<Option<Vec<Task>>, TaskError> {
        let mut changed = false;

        if let Some(change) = response.target_change {
            match change.target_change_type {
                Some(TargetChangeType::Current) => {
                    self.current = true;
                    changed = true;
                }
                Some(TargetChangeType::Reset) => {
                    self.tasks.clear();
                    self.current = false;
                }
                Some(TargetChangeType::Remove) => {
                    let reason = change.cause.map(|status| status.message).unwrap_or_default();
                    tracing::warn!(%reason, "Task listener removed");
                    return Err(TaskError::ListenClosed(reason));
                }
                _ => {}
            }
        }

        if let Some(change) = response.document_change {
            if change.target_ids.is_empty() && !change.removed_target_ids.is_empty() {
                changed |= self.tasks.remove(change.document.id()).is_some();
            } else {
                match Task::from_document(&change.document) {
                    Ok(task) => {
                        self.tasks.insert(task.id.clone(), task);
                        changed = true;
                    }
                    Err(e) => tracing::warn!(error = %e, "Skipping malformed task"),
                }
            }
        }

        let gone = [
            response.document_delete.map(|d| d.document),
            response.document_remove.map(|d| d.document),
        ];
        for name in gone.into_iter().flatten() {
            let id = name.rsplit('/').next().unwrap_or_default();
            changed |= self.tasks.remove(id).is_some();
        }

        Ok((self.current && changed).then(|| sorted(&self.tasks)))
    }
}
