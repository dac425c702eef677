//! Survey Sync Core Library
//!
//! Local-first synchronization for survey data: a durable local cache that
//! serves reads immediately and reconciles with a remote CRUD API in the
//! background, resolving conflicts by last-writer-wins on `updatedAt`.

pub mod clock;
pub mod engine;
pub mod error;
pub mod images;
pub mod models;
pub mod remote;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{
    GetHandle, ListHandle, PullReport, PushReport, SyncCollection, UpsertOptions,
};
pub use error::{RemoteError, RemoteResult, StorageError, SyncError};
pub use images::{
    content_hash, HttpImageUploader, ImageError, ImageStore, ImageUploader, MemoryUploader,
    ProgressCallback, RetryReport, UploadOptions, UploadOutcome,
};
pub use models::{Entity, ImageMetadata, JsonEntity, LocalRecord, SyncState, UploadStatus};
pub use remote::{HttpCollection, MemoryCollection, RemoteCollection, RemoteEnvelope, RemoteOp};
pub use store::{ChangeEvent, ChangeKind, ChangeNotifier, LocalStore, PendingBlob, Subscription};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
