//! Image object store.
//!
//! Image metadata is an ordinary synced collection; the binary content is
//! uploaded separately and held in the local blob table until the upload
//! succeeds. Archiving hides an image from the active set without deleting
//! anything, so restoring it never needs another upload.

mod uploader;

pub use uploader::{HttpImageUploader, ImageUploader, MemoryUploader, ProgressCallback};

use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

use crate::engine::{GetHandle, ListHandle, SyncCollection, UpsertOptions};
use crate::error::{RemoteError, StorageError, SyncError};
use crate::models::{data_url, ImageMetadata, UploadStatus};
use crate::remote::RemoteCollection;
use crate::store::{LocalStore, PendingBlob};

/// Collection name used for image metadata.
pub const COLLECTION: &str = "images";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Error, Debug)]
pub enum ImageError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Upload of {path} failed: {source}")]
    Upload {
        path: String,
        #[source]
        source: RemoteError,
    },

    #[error("Image not found: {0}")]
    NotFound(String),
}

impl From<StorageError> for ImageError {
    fn from(e: StorageError) -> Self {
        ImageError::Sync(SyncError::Storage(e))
    }
}

/// Hex SHA-256 of the content, used for deduplication.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Options for [`ImageStore::upload_image`].
#[derive(Clone, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub file_name: Option<String>,
    /// Precomputed hash; computed from the bytes when absent.
    pub content_hash: Option<String>,
    pub thumbnail_data_url: Option<String>,
    pub on_progress: Option<ProgressCallback>,
}

impl UploadOptions {
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn thumbnail(mut self, data_url: impl Into<String>) -> Self {
        self.thumbnail_data_url = Some(data_url.into());
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(std::sync::Arc::new(callback));
        self
    }
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("content_type", &self.content_type)
            .field("file_name", &self.file_name)
            .field("content_hash", &self.content_hash)
            .field("has_thumbnail", &self.thumbnail_data_url.is_some())
            .field("has_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// What `upload_image` did.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// Content was new and has been uploaded.
    Uploaded(ImageMetadata),
    /// An active image with the same content already exists.
    Duplicate(ImageMetadata),
    /// An archived image with the same content was restored.
    Restored(ImageMetadata),
}

impl UploadOutcome {
    pub fn metadata(&self) -> &ImageMetadata {
        match self {
            UploadOutcome::Uploaded(m) | UploadOutcome::Duplicate(m) | UploadOutcome::Restored(m) => m,
        }
    }

    pub fn into_metadata(self) -> ImageMetadata {
        match self {
            UploadOutcome::Uploaded(m) | UploadOutcome::Duplicate(m) | UploadOutcome::Restored(m) => m,
        }
    }
}

/// Outcome of [`ImageStore::retry_failed_uploads`].
#[derive(Debug, Default)]
pub struct RetryReport {
    pub uploaded: usize,
    /// Blobs whose metadata no longer exists; removed.
    pub orphaned: usize,
    pub failed: Vec<(String, ImageError)>,
}

pub struct ImageStore<R, U> {
    images: SyncCollection<ImageMetadata, R>,
    uploader: U,
}

impl<R: RemoteCollection<ImageMetadata>, U: ImageUploader> ImageStore<R, U> {
    pub fn new(images: SyncCollection<ImageMetadata, R>, uploader: U) -> Self {
        Self { images, uploader }
    }

    /// Builds the metadata collection on `store` under [`COLLECTION`].
    pub fn open(store: LocalStore, remote: R, uploader: U) -> Self {
        Self::new(SyncCollection::new(store, remote, COLLECTION), uploader)
    }

    pub fn images(&self) -> &SyncCollection<ImageMetadata, R> {
        &self.images
    }

    fn store(&self) -> &LocalStore {
        self.images.store()
    }

    pub fn use_list(&self) -> ListHandle<ImageMetadata> {
        self.images.use_list()
    }

    pub fn use_get(&self, id: &str) -> GetHandle<ImageMetadata> {
        self.images.use_get(id)
    }

    pub async fn get_image(&self, id: &str) -> Result<Option<ImageMetadata>, ImageError> {
        Ok(self.images.get_local(id).await?)
    }

    async fn require(&self, id: &str) -> Result<ImageMetadata, ImageError> {
        self.get_image(id)
            .await?
            .ok_or_else(|| ImageError::NotFound(id.to_string()))
    }

    pub async fn get_active_images(&self) -> Result<Vec<ImageMetadata>, ImageError> {
        let images = self.images.list_local().await?;
        Ok(images.into_iter().filter(ImageMetadata::is_active).collect())
    }

    pub async fn get_archived_images(&self) -> Result<Vec<ImageMetadata>, ImageError> {
        let images = self.images.list_local().await?;
        Ok(images.into_iter().filter(|m| m.is_archived).collect())
    }

    /// Writes metadata locally, and remotely once the content is uploaded.
    async fn save(&self, metadata: ImageMetadata) -> Result<ImageMetadata, ImageError> {
        let opts = if metadata.is_uploaded() {
            UpsertOptions::default()
        } else {
            UpsertOptions::local_only()
        };
        Ok(self.images.upsert(metadata, opts).await?.data)
    }

    async fn set_archived(&self, id: &str, archived: bool) -> Result<ImageMetadata, ImageError> {
        let mut metadata = self.require(id).await?;
        if metadata.is_archived == archived {
            return Ok(metadata);
        }
        metadata.is_archived = archived;
        self.save(metadata).await
    }

    pub async fn archive_image(&self, id: &str) -> Result<ImageMetadata, ImageError> {
        self.set_archived(id, true).await
    }

    pub async fn unarchive_image(&self, id: &str) -> Result<ImageMetadata, ImageError> {
        self.set_archived(id, false).await
    }

    /// Stores an image, skipping the upload when the same content is already
    /// known.
    ///
    /// An uploaded active match is reported as a duplicate; an active match
    /// whose upload never finished is uploaded again under its existing id.
    /// An archived match is restored instead of uploaded again. On upload failure the metadata is
    /// marked failed and the content stays queued for
    /// [`retry_failed_uploads`](Self::retry_failed_uploads).
    pub async fn upload_image(
        &self,
        bytes: Vec<u8>,
        path: &str,
        opts: UploadOptions,
    ) -> Result<UploadOutcome, ImageError> {
        let hash = opts
            .content_hash
            .clone()
            .unwrap_or_else(|| content_hash(&bytes));

        let known: Vec<ImageMetadata> = self
            .images
            .list_local()
            .await?
            .into_iter()
            .filter(|m| m.content_hash == hash)
            .collect();
        if let Some(active) = known.iter().find(|m| m.is_active()) {
            if active.is_uploaded() {
                tracing::debug!("Skipping upload of {}: duplicate of {}", path, active.id);
                return Ok(UploadOutcome::Duplicate(active.clone()));
            }
            tracing::debug!("Resuming upload of {} for {}", active.id, path);
            let blob = self.queue_blob(active, bytes).await?;
            return self.push_blob(active.clone(), blob, opts.on_progress).await;
        }
        if let Some(archived) = known.first() {
            tracing::debug!("Restoring archived image {} instead of uploading {}", archived.id, path);
            let restored = self.set_archived(&archived.id, false).await?;
            return Ok(UploadOutcome::Restored(restored));
        }

        let mut metadata = ImageMetadata::new(path, hash).with_size(bytes.len() as u64);
        metadata.file_name = opts.file_name.clone();
        metadata.content_type = opts.content_type.clone();
        metadata.thumbnail_data_url = opts.thumbnail_data_url.clone();

        let metadata = self.save(metadata).await?;
        let blob = self.queue_blob(&metadata, bytes).await?;

        self.push_blob(metadata, blob, opts.on_progress).await
    }

    async fn queue_blob(
        &self,
        metadata: &ImageMetadata,
        bytes: Vec<u8>,
    ) -> Result<PendingBlob, ImageError> {
        let blob = PendingBlob {
            id: metadata.id.clone(),
            image_path: metadata.image_path.clone(),
            content_type: metadata.content_type.clone(),
            bytes,
            created_at: self.images.now(),
        };
        self.store().put_blob(&blob).await?;
        Ok(blob)
    }

    async fn push_blob(
        &self,
        mut metadata: ImageMetadata,
        blob: PendingBlob,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadOutcome, ImageError> {
        let content_type = blob
            .content_type
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        if let Err(e) = self
            .uploader
            .upload(&metadata.image_path, &content_type, blob.bytes, progress)
            .await
        {
            tracing::warn!("Upload of {} failed: {}", metadata.image_path, e);
            metadata.upload_status = UploadStatus::Failed;
            let path = metadata.image_path.clone();
            self.save(metadata).await?;
            return Err(ImageError::Upload { path, source: e });
        }

        metadata.upload_status = UploadStatus::Uploaded;
        metadata.upload_progress = 100;

        let pushed = self
            .images
            .upsert(metadata.clone(), UpsertOptions::default())
            .await;
        // The content is safely remote once the local row says so
        if !matches!(pushed, Err(SyncError::Storage(_))) {
            self.store().delete_blob(&metadata.id).await?;
        }
        pushed?;

        tracing::info!("Uploaded image {} to {}", metadata.id, metadata.image_path);
        Ok(UploadOutcome::Uploaded(metadata))
    }

    /// Uploads every image whose content is still queued locally.
    pub async fn retry_failed_uploads(&self) -> Result<RetryReport, ImageError> {
        let mut report = RetryReport::default();

        for id in self.store().list_blob_ids().await? {
            let Some(blob) = self.store().get_blob(&id).await? else {
                continue;
            };

            let metadata = match self.images.get_local(&id).await? {
                Some(metadata) => metadata,
                None => {
                    tracing::debug!("Dropping orphaned image blob {}", id);
                    self.store().delete_blob(&id).await?;
                    report.orphaned += 1;
                    continue;
                }
            };

            let result = if metadata.is_uploaded() {
                // Content went up already; only the metadata push is missing
                self.store().delete_blob(&id).await?;
                self.save(metadata).await.map(UploadOutcome::Uploaded)
            } else {
                self.push_blob(metadata, blob, None).await
            };

            match result {
                Ok(_) => report.uploaded += 1,
                Err(e @ ImageError::Upload { .. }) | Err(e @ ImageError::Sync(SyncError::Remote(_))) => {
                    report.failed.push((id, e))
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            "Retried image uploads: {} uploaded, {} failed, {} orphaned",
            report.uploaded,
            report.failed.len(),
            report.orphaned
        );
        Ok(report)
    }

    /// Caches a thumbnail as a `data:` URL on the image's metadata.
    pub async fn set_thumbnail(
        &self,
        id: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<ImageMetadata, ImageError> {
        let mut metadata = self.require(id).await?;
        metadata.thumbnail_data_url = Some(data_url(content_type, bytes));
        self.save(metadata).await
    }

    pub async fn thumbnail(&self, id: &str) -> Result<Option<String>, ImageError> {
        Ok(self.require(id).await?.thumbnail_data_url)
    }

    /// Deletes the metadata (remotely too, when synced) and any queued content.
    pub async fn delete_image(&self, id: &str) -> Result<bool, ImageError> {
        let removed = self.images.delete(id).await?;
        self.store().delete_blob(id).await?;
        Ok(removed)
    }
}
