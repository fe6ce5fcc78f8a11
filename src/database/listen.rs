//! Live updates over the REST streaming protocol.
//!
//! A `GET` with `Accept: text/event-stream` keeps the connection open and
//! the server writes one event per change:
//!
//! ```text
//! event: put
//! data: {"path": "/", "data": {"a": 1}}
//!
//! event: keep-alive
//! data: null
//! ```
//!
//! `put` replaces the value at `path` (relative to the listened location),
//! `patch` merges children into it.

use super::{parse_database_error, DatabaseError};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream};
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::pin::Pin;
use std::task::{Context, Poll};

/// One change notification.
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseEvent {
    Put { path: String, data: Value },
    Patch { path: String, data: Value },
    KeepAlive,
    Cancel(String),
    AuthRevoked,
}

#[derive(Deserialize)]
struct EventPayload {
    path: String,
    #[serde(default)]
    data: Value,
}

/// A stream of `DatabaseEvent`s decoded from a server-sent event body.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: BytesMut,
    finished: bool,
}

impl EventStream {
    pub fn new(inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            finished: false,
        }
    }
}

impl Stream for EventStream {
    type Item = Result<DatabaseEvent, DatabaseError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some((len, skip)) = find_event_boundary(&self.buffer) {
                let block = self.buffer.split_to(len + skip);
                let text = String::from_utf8_lossy(&block[..len]).into_owned();
                match parse_event(&text) {
                    Ok(Some(event)) => return Poll::Ready(Some(Ok(event))),
                    Ok(None) => continue,
                    Err(e) => return Poll::Ready(Some(Err(e))),
                }
            }

            if self.finished {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buffer.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(DatabaseError::RequestError(e))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    if self.buffer.iter().all(|b| b.is_ascii_whitespace()) {
                        return Poll::Ready(None);
                    }
                    // A final event without the trailing blank line.
                    let rest = self.buffer.split();
                    let text = String::from_utf8_lossy(&rest).into_owned();
                    return match parse_event(&text) {
                        Ok(Some(event)) => Poll::Ready(Some(Ok(event))),
                        Ok(None) => Poll::Ready(None),
                        Err(e) => Poll::Ready(Some(Err(e))),
                    };
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Finds the end of the first event block: its length and the length of the
/// blank-line separator that follows it.
fn find_event_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == b'\n' {
            if buf.get(i + 1) == Some(&b'\n') {
                return Some((i, 2));
            }
            if buf.get(i + 1) == Some(&b'\r') && buf.get(i + 2) == Some(&b'\n') {
                return Some((i, 3));
            }
        }
        i += 1;
    }
    None
}

fn parse_event(block: &str) -> Result<Option<DatabaseEvent>, DatabaseError> {
    let mut name = None;
    let mut data = Vec::new();

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => name = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    let data = data.join("\n");
    let event = match name.as_deref() {
        None => return Ok(None),
        Some("put") => {
            let payload: EventPayload = serde_json::from_str(&data)?;
            DatabaseEvent::Put {
                path: payload.path,
                data: payload.data,
            }
        }
        Some("patch") => {
            let payload: EventPayload = serde_json::from_str(&data)?;
            DatabaseEvent::Patch {
                path: payload.path,
                data: payload.data,
            }
        }
        Some("keep-alive") => DatabaseEvent::KeepAlive,
        Some("cancel") => {
            let reason = serde_json::from_str::<Value>(&data)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or(data);
            DatabaseEvent::Cancel(reason)
        }
        Some("auth_revoked") => DatabaseEvent::AuthRevoked,
        Some(other) => {
            tracing::debug!(event = other, "Ignoring unknown database event");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

/// Applies a `put` or `patch` event to a local copy of the listened tree.
///
/// Returns `false` for events that carry no data change.
pub fn apply_event(tree: &mut Value, event: &DatabaseEvent) -> bool {
    match event {
        DatabaseEvent::Put { path, data } => {
            put_at(tree, path, data.clone());
            true
        }
        DatabaseEvent::Patch { path, data } => {
            if let Value::Object(children) = data {
                for (key, value) in children {
                    let child = format!("{}/{}", path.trim_end_matches('/'), key);
                    put_at(tree, &child, value.clone());
                }
            }
            true
        }
        _ => false,
    }
}

fn put_at(tree: &mut Value, path: &str, data: Value) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if data.is_null() {
        if remove_at(tree, &segments) {
            *tree = Value::Null;
        }
        return;
    }

    let Some((last, parents)) = segments.split_last() else {
        *tree = data;
        return;
    };

    let mut node = tree;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else { return };
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert(last.to_string(), data);
    }
}

/// Deletes the node at `segments`, pruning parents left without children.
///
/// Returns `true` when `node` itself no longer holds any data.
fn remove_at(node: &mut Value, segments: &[&str]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return true;
    };
    let Value::Object(map) = node else {
        return false;
    };
    let Some(child) = map.get_mut(*first) else {
        return false;
    };

    if remove_at(child, rest) {
        map.remove(*first);
    }
    map.is_empty()
}

pub async fn listen_request(
    client: &ClientWithMiddleware,
    url: &str,
    params: &[(&str, String)],
) -> Result<EventStream, DatabaseError> {
    let response = client
        .get(url)
        .query(params)
        .header(header::ACCEPT, "text/event-stream")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(DatabaseError::ApiError(
            parse_database_error(response, "Listen failed").await,
        ));
    }

    let stream = stream::unfold(response, |mut resp| async move {
        match resp.chunk().await {
            Ok(Some(bytes)) => Some((Ok(bytes), resp)),
            Ok(None) => None,
            Err(e) => Some((Err(e), resp)),
        }
    });

    Ok(EventStream::new(Box::pin(stream)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn stream_of(chunks: &[&'static str]) -> EventStream {
        let items: Vec<Result<Bytes, reqwest::Error>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        EventStream::new(Box::pin(stream::iter(items)))
    }

    #[test]
    fn test_find_event_boundary() {
        assert_eq!(find_event_boundary(b"event: put\ndata: 1\n\nrest"), Some((18, 2)));
        assert_eq!(find_event_boundary(b"event: put\r\ndata: 1\r\n\r\n"), Some((20, 3)));
        assert_eq!(find_event_boundary(b"event: put\ndata: 1\n"), None);
        assert_eq!(find_event_boundary(b""), None);
    }

    #[tokio::test]
    async fn test_events_split_across_chunks() {
        let mut events = stream_of(&[
            "event: put\ndata: {\"path\":\"/\",",
            "\"data\":{\"a\":1}}\n\nevent: keep-alive\ndata: null\n\n",
            "event: patch\ndata: {\"path\":\"/b\",\"data\":{\"c\":2}}\n\n",
            "event: cancel\ndata: \"Permission denied\"\n\n",
            "event: auth_revoked\ndata: \"credential is no longer valid\"",
        ]);

        assert_eq!(
            events.next().await.unwrap().unwrap(),
            DatabaseEvent::Put { path: "/".into(), data: json!({"a": 1}) }
        );
        assert_eq!(events.next().await.unwrap().unwrap(), DatabaseEvent::KeepAlive);
        assert_eq!(
            events.next().await.unwrap().unwrap(),
            DatabaseEvent::Patch { path: "/b".into(), data: json!({"c": 2}) }
        );
        assert_eq!(
            events.next().await.unwrap().unwrap(),
            DatabaseEvent::Cancel("Permission denied".into())
        );
        assert_eq!(events.next().await.unwrap().unwrap(), DatabaseEvent::AuthRevoked);
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_an_error() {
        let mut events = stream_of(&["event: put\ndata: {not json}\n\n"]);
        assert!(matches!(
            events.next().await.unwrap(),
            Err(DatabaseError::SerializationError(_))
        ));
    }

    #[test]
    fn test_apply_put_and_patch() {
        let mut tree = Value::Null;

        apply_event(&mut tree, &DatabaseEvent::Put {
            path: "/".into(),
            data: json!({"m1": {"text": "hi"}}),
        });
        apply_event(&mut tree, &DatabaseEvent::Put {
            path: "/m2".into(),
            data: json!({"text": "there"}),
        });
        apply_event(&mut tree, &DatabaseEvent::Put {
            path: "/m1/text".into(),
            data: json!("hello"),
        });
        apply_event(&mut tree, &DatabaseEvent::Patch {
            path: "/".into(),
            data: json!({"m3": {"text": "!"}, "m2": null}),
        });
        assert_eq!(tree, json!({"m1": {"text": "hello"}, "m3": {"text": "!"}}));

        apply_event(&mut tree, &DatabaseEvent::Put { path: "/".into(), data: Value::Null });
        assert_eq!(tree, Value::Null);

        assert!(!apply_event(&mut tree, &DatabaseEvent::KeepAlive));
    }

    #[test]
    fn test_removing_missing_path_is_a_no_op() {
        let mut tree = json!({"a": 1});
        apply_event(&mut tree, &DatabaseEvent::Put { path: "/x/y".into(), data: Value::Null });
        assert_eq!(tree, json!({"a": 1}));
    }

    #[test]
    fn test_removing_last_child_prunes_parents() {
        let mut tree = json!({"m1": {"text": "hi"}, "m2": {"text": "yo"}});

        apply_event(&mut tree, &DatabaseEvent::Put { path: "/m1/text".into(), data: Value::Null });
        apply_event(&mut tree, &DatabaseEvent::Put { path: "/gone/child".into(), data: Value::Null });
        assert_eq!(tree, json!({"m2": {"text": "yo"}}));

        apply_event(&mut tree, &DatabaseEvent::Patch {
            path: "/m2".into(),
            data: json!({"text": null}),
        });
        assert_eq!(tree, Value::Null);
    }

    #[test]
    fn test_removing_below_a_leaf_keeps_it() {
        let mut tree = json!({"a": 1});
        apply_event(&mut tree, &DatabaseEvent::Put { path: "/a/b".into(), data: Value::Null });
        assert_eq!(tree, json!({"a": 1}));
    }
}
