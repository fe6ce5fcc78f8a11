use super::models::{ListenRequest, ListenResponse};
use super::FirestoreError;
use crate::core::parse_error_response;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream};
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A stream of `ListenResponse` messages.
///
/// The server frames the responses as one long JSON array (`[{..},\n{..}`)
/// that stays open while the listener is active.
pub struct ListenStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: BytesMut,
    finished: bool,
}

impl ListenStream {
    pub fn new(inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            finished: false,
        }
    }
}

impl Stream for ListenStream {
    type Item = Result<ListenResponse, FirestoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            // Drop array brackets, separators and whitespace between messages.
            let skip = leading_separators(&self.buffer);
            if skip > 0 {
                let _ = self.buffer.split_to(skip);
            }

            if let Some(len) = find_object_end(&self.buffer) {
                let bytes = self.buffer.split_to(len);
                return Poll::Ready(Some(
                    serde_json::from_slice::<ListenResponse>(&bytes)
                        .map_err(FirestoreError::SerializationError),
                ));
            }

            if self.finished {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buffer.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(FirestoreError::RequestError(e))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    if !self.buffer.is_empty() {
                        self.buffer.clear();
                        return Poll::Ready(Some(Err(FirestoreError::ApiError(
                            "Stream ended with incomplete JSON".into(),
                        ))));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

fn leading_separators(buf: &[u8]) -> usize {
    buf.iter()
        .take_while(|b| b.is_ascii_whitespace() || matches!(b, b'[' | b']' | b','))
        .count()
}

/// Finds the length of the JSON object at the start of the buffer, if it is complete.
fn find_object_end(buf: &[u8]) -> Option<usize> {
    if buf.first() != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in buf.iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Opens a listen channel on `{database_url}/documents:listen`.
pub async fn listen_request(
    client: &ClientWithMiddleware,
    database_url: &str,
    request: &ListenRequest,
) -> Result<ListenStream, FirestoreError> {
    let url = format!("{}/documents:listen", database_url);

    let response = client
        .post(&url)
        .header(header::CONTENT_TYPE, "application/json")
        .body(serde_json::to_vec(request)?)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(FirestoreError::ApiError(
            parse_error_response(response, "Listen failed").await,
        ));
    }

    let stream = stream::unfold(response, |mut resp| async move {
        match resp.chunk().await {
            Ok(Some(bytes)) => Some((Ok(bytes), resp)),
            Ok(None) => None,
            Err(e) => Some((Err(e), resp)),
        }
    });

    Ok(ListenStream::new(Box::pin(stream)))
}
