//! Durable local cache backed by SQLite.
//!
//! Every collection (entity type) is a logical table inside the single
//! `local_records` table, keyed by `(collection, id)`. Rows hold
//! `{id, updated_at, sync_state, data}` with `data` stored as JSON.
//! Binary content of images waiting for upload lives in `image_blobs`.

mod notify;

pub use notify::{ChangeEvent, ChangeKind, ChangeNotifier, Subscription};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::error::StorageError;
use crate::models::{format_timestamp, parse_timestamp, LocalRecord, SyncState};

/// Handle to the local database. Cheap to clone; clones share the pool and
/// the change notifier.
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
    notifier: ChangeNotifier,
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: String,
    updated_at: String,
    sync_state: String,
    data: String,
}

impl RecordRow {
    fn into_record<T: DeserializeOwned>(self) -> Result<LocalRecord<T>, StorageError> {
        let updated_at = parse_timestamp(&self.updated_at).ok_or_else(|| StorageError::Corrupt {
            id: self.id.clone(),
            field: "updated_at",
            value: self.updated_at.clone(),
        })?;
        let sync_state = SyncState::parse(&self.sync_state).ok_or_else(|| StorageError::Corrupt {
            id: self.id.clone(),
            field: "sync_state",
            value: self.sync_state.clone(),
        })?;
        let data = serde_json::from_str(&self.data)?;

        Ok(LocalRecord {
            id: self.id,
            updated_at,
            sync_state,
            data,
        })
    }
}

/// Image content kept locally until its upload completes.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBlob {
    pub id: String,
    pub image_path: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct BlobRow {
    id: String,
    image_path: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
    created_at: String,
}

impl LocalStore {
    /// Opens (or creates) the database file and runs migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Io(parent.to_path_buf(), e))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Opens a private in-memory database.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // Every connection to :memory: is a separate database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            notifier: ChangeNotifier::new(),
        })
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<LocalRecord<T>>, StorageError> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT id, updated_at, sync_state, data FROM local_records WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RecordRow::into_record).transpose()
    }

    pub async fn list<T: DeserializeOwned>(
        &self,
        collection: &str,
    ) -> Result<Vec<LocalRecord<T>>, StorageError> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            "SELECT id, updated_at, sync_state, data FROM local_records WHERE collection = ? ORDER BY rowid",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RecordRow::into_record).collect()
    }

    pub async fn list_by_state<T: DeserializeOwned>(
        &self,
        collection: &str,
        state: SyncState,
    ) -> Result<Vec<LocalRecord<T>>, StorageError> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            r#"
            SELECT id, updated_at, sync_state, data FROM local_records
            WHERE collection = ? AND sync_state = ?
            ORDER BY updated_at
            "#,
        )
        .bind(collection)
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RecordRow::into_record).collect()
    }

    /// Inserts or wholesale-replaces the row for `record.id`.
    pub async fn put<T: Serialize>(
        &self,
        collection: &str,
        record: &LocalRecord<T>,
    ) -> Result<(), StorageError> {
        let record = record.to_json()?;
        let data = serde_json::to_string(&record.data)?;
        let updated_at = format_timestamp(&record.updated_at);

        let mut tx = self.pool.begin().await?;

        // The first statement writes so the busy handler covers lock contention.
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO local_records (collection, id, updated_at, sync_state, data)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(collection)
        .bind(&record.id)
        .bind(&updated_at)
        .bind(record.sync_state.as_str())
        .bind(&data)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !inserted {
            sqlx::query(
                r#"
                UPDATE local_records
                SET updated_at = ?, sync_state = ?, data = ?
                WHERE collection = ? AND id = ?
                "#,
            )
            .bind(&updated_at)
            .bind(record.sync_state.as_str())
            .bind(&data)
            .bind(collection)
            .bind(&record.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let kind = if inserted {
            ChangeKind::Created
        } else {
            ChangeKind::Updated
        };
        self.notifier.notify(&ChangeEvent {
            collection: collection.to_string(),
            kind,
            id: record.id.clone(),
            record: Some(record),
        });

        Ok(())
    }

    /// Removes a row. Deleting a missing id is not an error; returns whether
    /// a row was removed.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM local_records WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            self.notifier.notify(&ChangeEvent {
                collection: collection.to_string(),
                kind: ChangeKind::Deleted,
                id: id.to_string(),
                record: None,
            });
        }

        Ok(removed)
    }

    /// Names of all collections with at least one row.
    pub async fn collections(&self) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT collection FROM local_records ORDER BY collection")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(c,)| c).collect())
    }

    pub async fn count(
        &self,
        collection: &str,
        state: Option<SyncState>,
    ) -> Result<u64, StorageError> {
        let (count,): (i64,) = match state {
            Some(state) => {
                sqlx::query_as(
                    "SELECT COUNT(*) FROM local_records WHERE collection = ? AND sync_state = ?",
                )
                .bind(collection)
                .bind(state.as_str())
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM local_records WHERE collection = ?")
                    .bind(collection)
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count.max(0) as u64)
    }

    // ========== Pending image blobs ==========

    pub async fn put_blob(&self, blob: &PendingBlob) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO image_blobs (id, image_path, content_type, bytes, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&blob.id)
        .bind(&blob.image_path)
        .bind(&blob.content_type)
        .bind(&blob.bytes)
        .bind(format_timestamp(&blob.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_blob(&self, id: &str) -> Result<Option<PendingBlob>, StorageError> {
        let row: Option<BlobRow> = sqlx::query_as(
            "SELECT id, image_path, content_type, bytes, created_at FROM image_blobs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let created_at =
                parse_timestamp(&row.created_at).ok_or_else(|| StorageError::Corrupt {
                    id: row.id.clone(),
                    field: "created_at",
                    value: row.created_at.clone(),
                })?;
            Ok(PendingBlob {
                id: row.id,
                image_path: row.image_path,
                content_type: row.content_type,
                bytes: row.bytes,
                created_at,
            })
        })
        .transpose()
    }

    pub async fn delete_blob(&self, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM image_blobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Ids of all pending blobs, oldest first.
    pub async fn list_blob_ids(&self) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM image_blobs ORDER BY created_at, id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
