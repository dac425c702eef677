//! Error types shared by the store, the remote adapters and the engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result of a remote adapter call.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Local store failures. Never retried; always surfaced to the caller.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error for {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Corrupt {field} in stored record {id}: {value}")]
    Corrupt {
        id: String,
        field: &'static str,
        value: String,
    },
}

/// A remote adapter call that reported errors.
///
/// Replaces the `{data, errors}` response shape: an `Ok` carries the data,
/// an `Err` carries the error messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Remote error: {}", .errors.join("; "))]
pub struct RemoteError {
    pub errors: Vec<String>,
}

impl RemoteError {
    pub fn new(errors: Vec<String>) -> Self {
        Self { errors }
    }

    /// Creates an error with a single message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
        }
    }
}

/// Errors returned by the sync engine's write paths.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_joins_messages() {
        let err = RemoteError::new(vec!["validation failed".into(), "name required".into()]);
        assert_eq!(
            err.to_string(),
            "Remote error: validation failed; name required"
        );
    }

    #[test]
    fn test_sync_error_is_transparent_over_remote() {
        let err: SyncError = RemoteError::message("boom").into();
        assert_eq!(err.to_string(), "Remote error: boom");
        assert!(matches!(err, SyncError::Remote(_)));
    }
}
