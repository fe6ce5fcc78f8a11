//! Upload progress reporting.

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;

/// Size of the pieces an upload body is handed to the transport in.
pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            bytes_transferred: 0,
            total_bytes,
        }
    }

    /// Completion in percent, `0.0..=100.0`.
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.bytes_transferred == 0 { 0.0 } else { 100.0 };
        }
        (self.bytes_transferred as f64 / self.total_bytes as f64 * 100.0).min(100.0)
    }

    pub fn is_complete(&self) -> bool {
        self.total_bytes > 0 && self.bytes_transferred >= self.total_bytes
    }
}

/// Wraps `data` in a streaming body that publishes how much of it the
/// transport has consumed.
pub(crate) fn progress_body(data: Bytes, progress: watch::Sender<UploadProgress>) -> reqwest::Body {
    let total = data.len() as u64;
    progress.send_replace(UploadProgress::new(total));

    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(CHUNK_SIZE)
        .map(|start| data.slice(start..(start + CHUNK_SIZE).min(data.len())))
        .collect();

    let body = stream::iter(chunks).map(move |chunk| {
        let len = chunk.len() as u64;
        progress.send_modify(|p| p.bytes_transferred = (p.bytes_transferred + len).min(total));
        Ok::<Bytes, std::io::Error>(chunk)
    });

    reqwest::Body::wrap_stream(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        let mut progress = UploadProgress::new(200);
        assert_eq!(progress.percent(), 0.0);
        progress.bytes_transferred = 50;
        assert_eq!(progress.percent(), 25.0);
        progress.bytes_transferred = 200;
        assert_eq!(progress.percent(), 100.0);
        assert!(progress.is_complete());

        assert_eq!(UploadProgress::default().percent(), 0.0);
        assert!(!UploadProgress::default().is_complete());
    }

    #[test]
    fn test_body_publishes_total() {
        let (tx, rx) = watch::channel(UploadProgress::default());
        let _body = progress_body(Bytes::from(vec![0u8; CHUNK_SIZE * 2 + 10]), tx);
        assert_eq!(rx.borrow().total_bytes, (CHUNK_SIZE * 2 + 10) as u64);
        assert_eq!(rx.borrow().bytes_transferred, 0);
    }
}
