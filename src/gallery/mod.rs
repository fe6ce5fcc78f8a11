//! Image gallery backed by the `images/` folder of the default Storage bucket.

#[cfg(test)]
mod tests;

use crate::storage::bucket::Bucket;
use crate::storage::file::File;
use crate::storage::upload::UploadProgress;
use crate::storage::{FirebaseStorage, StorageError};
use bytes::Bytes;
use futures::future::try_join_all;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::watch;

pub const IMAGES_FOLDER: &str = "images";

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("An upload is already in progress")]
    Busy,
    #[error("Invalid file name: {0:?}")]
    InvalidName(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    /// Full object path, `images/<file>`.
    pub path: String,
    pub url: String,
}

#[derive(Debug, Default)]
struct GalleryState {
    images: Vec<StoredImage>,
    uploading: bool,
}

/// Clears the uploading flag however the upload ends.
struct UploadGuard<'a>(&'a Mutex<GalleryState>);

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .uploading = false;
    }
}

#[derive(Clone)]
pub struct Gallery {
    bucket: Bucket,
    state: Arc<Mutex<GalleryState>>,
    progress: watch::Sender<UploadProgress>,
}

impl Gallery {
    pub fn new(storage: &FirebaseStorage) -> Self {
        Self {
            bucket: storage.bucket(None),
            state: Arc::default(),
            progress: watch::Sender::new(UploadProgress::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, GalleryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn images(&self) -> Vec<StoredImage> {
        self.state().images.clone()
    }

    pub fn is_uploading(&self) -> bool {
        self.state().uploading
    }

    /// Progress of the current (or last) upload.
    pub fn progress(&self) -> watch::Receiver<UploadProgress> {
        self.progress.subscribe()
    }

    /// Replaces the local list with the contents of the `images/` folder.
    pub async fn load(&self) -> Result<Vec<StoredImage>, GalleryError> {
        let listing = self.bucket.list(IMAGES_FOLDER).await?;
        let images = try_join_all(listing.items.iter().map(stored_image)).await?;

        tracing::debug!(count = images.len(), "Gallery loaded");
        self.state().images = images.clone();
        Ok(images)
    }

    /// Uploads an image as `images/<name>` and puts it at the front of the list.
    ///
    /// Only the last segment of `name` is used. Only one upload runs at a time.
    pub async fn upload(
        &self,
        name: &str,
        data: impl Into<Bytes>,
        content_type: &str,
    ) -> Result<StoredImage, GalleryError> {
        let file_name = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
        if file_name.is_empty() {
            return Err(GalleryError::InvalidName(name.to_string()));
        }

        {
            let mut state = self.state();
            if state.uploading {
                return Err(GalleryError::Busy);
            }
            state.uploading = true;
        }
        let _guard = UploadGuard(&*self.state);

        let file = self.bucket.file(&format!("{}/{}", IMAGES_FOLDER, file_name));
        file.upload(data.into(), content_type, self.progress.clone())
            .await?;
        let image = stored_image(&file).await?;

        tracing::info!(path = %image.path, "Image uploaded");
        {
            let mut state = self.state();
            state.images.retain(|existing| existing.path != image.path);
            state.images.insert(0, image.clone());
        }
        Ok(image)
    }

    /// Deletes the object, then drops it from the local list.
    pub async fn delete(&self, path: &str) -> Result<(), GalleryError> {
        self.bucket.file(path).delete().await?;
        self.state().images.retain(|image| image.path != path);
        tracing::info!(%path, "Image deleted");
        Ok(())
    }
}

async fn stored_image(file: &File) -> Result<StoredImage, StorageError> {
    Ok(StoredImage {
        path: file.name().to_string(),
        url: file.download_url().await?,
    })
}
