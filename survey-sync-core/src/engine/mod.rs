//! Synchronization engine for one collection.
//!
//! Reads are served from the local store immediately and refreshed from the
//! remote in the background. Writes go to the local store first and are then
//! pushed to the remote. Conflicts resolve by last-writer-wins on the remote
//! record's `updatedAt`; see [`reconcile::decide`].

mod handle;
pub mod reconcile;

pub use handle::{GetHandle, ListHandle};

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::{RemoteError, StorageError, SyncError};
use crate::models::{Entity, LocalRecord, SyncState};
use crate::remote::RemoteCollection;
use crate::store::LocalStore;
use handle::{ItemState, ListState, Projection};
use reconcile::{Decision, SkipReason};

/// Options for [`SyncCollection::upsert`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOptions {
    /// Write locally and skip the remote call.
    pub local_only: bool,
}

impl UpsertOptions {
    pub fn local_only() -> Self {
        Self { local_only: true }
    }
}

/// Outcome of a one-shot [`SyncCollection::pull`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub fetched: usize,
    pub applied: usize,
    pub skipped: usize,
}

/// Outcome of [`SyncCollection::push_pending`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushReport {
    pub pushed: usize,
    pub failed: Vec<(String, RemoteError)>,
}

impl PushReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

struct Inner<R> {
    store: LocalStore,
    remote: R,
    collection: String,
    clock: Arc<dyn Clock>,
}

/// A collection kept in sync between the local store and a remote.
///
/// Cheap to clone; clones share the store, the remote and the clock.
pub struct SyncCollection<T, R> {
    inner: Arc<Inner<R>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T, R> Clone for SyncCollection<T, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity, R: RemoteCollection<T>> SyncCollection<T, R> {
    pub fn new(store: LocalStore, remote: R, collection: impl Into<String>) -> Self {
        Self::with_clock(store, remote, collection, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: LocalStore,
        remote: R,
        collection: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                collection: collection.into(),
                clock,
            }),
            _entity: PhantomData,
        }
    }

    pub fn collection(&self) -> &str {
        &self.inner.collection
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    pub fn remote(&self) -> &R {
        &self.inner.remote
    }

    /// Current time from the collection's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    async fn write(&self, data: &T, state: SyncState) -> Result<LocalRecord<T>, StorageError> {
        // Stored timestamps keep microseconds; match them so the returned record reads back equal.
        let now = self.inner.clock.now().trunc_subsecs(6);
        let record = LocalRecord::new(data.id(), now, state, data.clone());
        self.inner.store.put(&self.inner.collection, &record).await?;
        Ok(record)
    }

    // ========== Reads ==========

    pub async fn get_record(&self, id: &str) -> Result<Option<LocalRecord<T>>, StorageError> {
        self.inner.store.get(&self.inner.collection, id).await
    }

    pub async fn list_records(&self) -> Result<Vec<LocalRecord<T>>, StorageError> {
        self.inner.store.list(&self.inner.collection).await
    }

    /// The cached entity, without contacting the remote.
    pub async fn get_local(&self, id: &str) -> Result<Option<T>, StorageError> {
        Ok(self.get_record(id).await?.map(|r| r.data))
    }

    /// Every cached entity, without contacting the remote.
    pub async fn list_local(&self) -> Result<Vec<T>, StorageError> {
        Ok(self
            .list_records()
            .await?
            .into_iter()
            .map(|r| r.data)
            .collect())
    }

    /// Live view of the whole collection.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn use_list(&self) -> ListHandle<T> {
        let projection = Projection::new(ListState::new());

        let listener = Arc::clone(&projection);
        let subscription = self
            .inner
            .store
            .notifier()
            .on_change(&self.inner.collection, move |event| {
                listener.update(|state| state.on_event(event));
            });

        let local_task = {
            let this = self.clone();
            let projection = Arc::clone(&projection);
            tokio::spawn(async move {
                match this.list_local().await {
                    Ok(items) => projection.update(|state| state.load(items)),
                    Err(e) => {
                        tracing::warn!("Failed to read local {}: {}", this.inner.collection, e);
                        projection.update(|state| state.finish_loading());
                    }
                }
            })
        };

        let remote_task = {
            let this = self.clone();
            let projection = Arc::clone(&projection);
            tokio::spawn(async move {
                if this.refresh_list().await == 0 {
                    return;
                }
                match this.list_local().await {
                    Ok(items) => projection.update(|state| state.replace(items)),
                    Err(e) => {
                        tracing::warn!("Failed to re-read local {}: {}", this.inner.collection, e)
                    }
                }
            })
        };

        ListHandle::new(projection, subscription, vec![local_task, remote_task])
    }

    /// Live view of a single record.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn use_get(&self, id: &str) -> GetHandle<T> {
        let projection = Projection::new(ItemState::new());

        let listener = Arc::clone(&projection);
        let target = id.to_string();
        let subscription = self
            .inner
            .store
            .notifier()
            .on_change(&self.inner.collection, move |event| {
                if event.id == target {
                    listener.update(|state| state.on_event(event));
                }
            });

        let local_task = {
            let this = self.clone();
            let projection = Arc::clone(&projection);
            let id = id.to_string();
            tokio::spawn(async move {
                match this.get_local(&id).await {
                    Ok(item) => projection.update(|state| state.load(item)),
                    Err(e) => {
                        tracing::warn!("Failed to read local {}/{}: {}", this.inner.collection, id, e);
                        projection.update(|state| state.finish_loading());
                    }
                }
            })
        };

        let remote_task = {
            let this = self.clone();
            let projection = Arc::clone(&projection);
            let id = id.to_string();
            tokio::spawn(async move {
                if !this.refresh_one(&id).await {
                    return;
                }
                match this.get_local(&id).await {
                    Ok(item) => projection.update(|state| state.replace(item)),
                    Err(e) => tracing::warn!(
                        "Failed to re-read local {}/{}: {}",
                        this.inner.collection,
                        id,
                        e
                    ),
                }
            })
        };

        GetHandle::new(id.to_string(), projection, subscription, vec![local_task, remote_task])
    }

    // ========== Reconciliation ==========

    /// Writes `item` as synced when it wins last-writer-wins against the
    /// local copy. Returns whether it was applied.
    pub async fn reconcile(&self, item: T) -> Result<bool, StorageError> {
        let local: Option<LocalRecord<Value>> =
            self.inner.store.get(&self.inner.collection, item.id()).await?;

        match reconcile::decide(local.as_ref(), &item) {
            Decision::Apply => {
                self.write(&item, SyncState::Synced).await?;
                tracing::debug!("Applied remote {}/{}", self.inner.collection, item.id());
                Ok(true)
            }
            Decision::Skip(SkipReason::Uncomparable) => {
                tracing::debug!(
                    "Skipped remote {}/{}: updatedAt missing or invalid",
                    self.inner.collection,
                    item.id()
                );
                Ok(false)
            }
            Decision::Skip(SkipReason::NotNewer) => Ok(false),
        }
    }

    /// Background refresh for `use_list`. Returns how many items were applied.
    async fn refresh_list(&self) -> usize {
        let items = match self.inner.remote.list().await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("Remote list of {} failed: {}", self.inner.collection, e);
                return 0;
            }
        };

        let mut applied = 0;
        for item in items {
            if !self.has_id(&item) {
                continue;
            }
            let id = item.id().to_string();
            match self.reconcile(item).await {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    "Failed to store remote {}/{}: {}",
                    self.inner.collection,
                    id,
                    e
                ),
            }
        }
        applied
    }

    fn has_id(&self, item: &T) -> bool {
        if item.id().is_empty() {
            tracing::debug!("Skipped remote {} item without an id", self.inner.collection);
            return false;
        }
        true
    }

    /// Background refresh for `use_get`. Returns whether the item was applied.
    async fn refresh_one(&self, id: &str) -> bool {
        match self.inner.remote.get(id).await {
            Ok(Some(item)) => match self.reconcile(item).await {
                Ok(applied) => applied,
                Err(e) => {
                    tracing::warn!("Failed to store remote {}/{}: {}", self.inner.collection, id, e);
                    false
                }
            },
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("Remote get of {}/{} failed: {}", self.inner.collection, id, e);
                false
            }
        }
    }

    /// Fetches the remote list once and reconciles every item.
    pub async fn pull(&self) -> Result<PullReport, SyncError> {
        let items = self.inner.remote.list().await?;

        let mut report = PullReport {
            fetched: items.len(),
            ..PullReport::default()
        };
        for item in items {
            if !self.has_id(&item) {
                report.skipped += 1;
                continue;
            }
            if self.reconcile(item).await? {
                report.applied += 1;
            } else {
                report.skipped += 1;
            }
        }

        tracing::info!(
            "Pulled {}: {} fetched, {} applied, {} skipped",
            self.inner.collection,
            report.fetched,
            report.applied,
            report.skipped
        );
        Ok(report)
    }

    // ========== Writes ==========

    /// Creates the record remotely, then caches the remote's version.
    ///
    /// On failure the local store is untouched.
    pub async fn add(&self, data: T) -> Result<T, SyncError> {
        let created = match self.inner.remote.create(&data).await {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!("Failed to create {}/{}: {}", self.inner.collection, data.id(), e);
                return Err(e.into());
            }
        };

        self.write(&created, SyncState::Synced).await?;
        Ok(created)
    }

    /// Deletes a record. Synced records are deleted remotely first and kept
    /// locally if that fails. Returns whether a local row was removed.
    pub async fn delete(&self, id: &str) -> Result<bool, SyncError> {
        let existing: Option<LocalRecord<Value>> =
            self.inner.store.get(&self.inner.collection, id).await?;

        if existing.as_ref().is_some_and(LocalRecord::is_synced) {
            if let Err(e) = self.inner.remote.delete(id).await {
                tracing::warn!("Failed to delete {}/{}: {}", self.inner.collection, id, e);
                return Err(e.into());
            }
        }

        Ok(self.inner.store.delete(&self.inner.collection, id).await?)
    }

    /// Writes locally, then creates or updates remotely.
    ///
    /// The local write (and its change notification) lands before any
    /// remote call. A record that was never synced is created; a synced one
    /// is updated. On remote failure the edit stays in place as `local`, so
    /// [`push_pending`](Self::push_pending) picks it up, and the error is
    /// returned.
    pub async fn upsert(&self, data: T, opts: UpsertOptions) -> Result<LocalRecord<T>, SyncError> {
        let prior_state = self
            .inner
            .store
            .get::<Value>(&self.inner.collection, data.id())
            .await?
            .map_or(SyncState::Local, |r| r.sync_state);

        let record = self.write(&data, prior_state).await?;
        if opts.local_only {
            return Ok(record);
        }

        let result = match prior_state {
            SyncState::Local => self.inner.remote.create(&data).await,
            SyncState::Synced => self.inner.remote.update(&data).await,
        };

        match result {
            Ok(_) => Ok(self.write(&data, SyncState::Synced).await?),
            Err(e) => {
                tracing::warn!("Failed to push {}/{}: {}", self.inner.collection, data.id(), e);
                if prior_state == SyncState::Synced {
                    self.write(&data, SyncState::Local).await?;
                }
                Err(e.into())
            }
        }
    }

    /// Pushes every `local` record. Records the remote already holds (an
    /// edit whose update failed) are updated; the rest are created.
    pub async fn push_pending(&self) -> Result<PushReport, StorageError> {
        let pending: Vec<LocalRecord<T>> = self
            .inner
            .store
            .list_by_state(&self.inner.collection, SyncState::Local)
            .await?;

        let mut report = PushReport::default();
        for record in pending {
            match self.push_one(&record.data).await {
                Ok(_) => {
                    self.write(&record.data, SyncState::Synced).await?;
                    report.pushed += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to push {}/{}: {}", self.inner.collection, record.id, e);
                    report.failed.push((record.id, e));
                }
            }
        }

        tracing::info!(
            "Pushed {}: {} pushed, {} failed",
            self.inner.collection,
            report.pushed,
            report.failed.len()
        );
        Ok(report)
    }

    async fn push_one(&self, data: &T) -> Result<T, RemoteError> {
        match self.inner.remote.get(data.id()).await? {
            Some(_) => self.inner.remote.update(data).await,
            None => self.inner.remote.create(data).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{parse_timestamp, JsonEntity};
    use crate::remote::{MemoryCollection, RemoteOp};
    use parking_lot::Mutex;
    use serde_json::json;

    type Remote = Arc<MemoryCollection<JsonEntity>>;

    fn ts(s: &str) -> DateTime<Utc> {
        parse_timestamp(s).unwrap()
    }

    fn survey(id: &str, name: &str, updated_at: Option<&str>) -> JsonEntity {
        match updated_at {
            Some(ts) => JsonEntity::new(json!({ "id": id, "name": name, "updatedAt": ts })),
            None => JsonEntity::new(json!({ "id": id, "name": name })),
        }
    }

    async fn setup() -> (SyncCollection<JsonEntity, Remote>, Remote, Arc<ManualClock>) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let remote: Remote = Arc::new(MemoryCollection::new());
        let clock = Arc::new(ManualClock::new(ts("2024-06-01T00:00:00Z")));
        let surveys = SyncCollection::with_clock(store, remote.clone(), "surveys", clock.clone());
        (surveys, remote, clock)
    }

    async fn seed_local(
        surveys: &SyncCollection<JsonEntity, Remote>,
        item: JsonEntity,
        updated_at: &str,
        state: SyncState,
    ) {
        let record = LocalRecord::new(item.id().to_string(), ts(updated_at), state, item);
        surveys.store().put("surveys", &record).await.unwrap();
    }

    // ========== Reconciliation ==========

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let (surveys, _, _) = setup().await;
        let item = survey("s1", "Kitchen", Some("2024-05-01T00:00:00Z"));

        assert!(surveys.reconcile(item.clone()).await.unwrap());
        let first = surveys.get_record("s1").await.unwrap().unwrap();

        assert!(!surveys.reconcile(item).await.unwrap());
        let second = surveys.get_record("s1").await.unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_reconcile_never_moves_backwards() {
        let (surveys, _, _) = setup().await;
        seed_local(
            &surveys,
            survey("s1", "Current", None),
            "2024-05-01T00:00:00Z",
            SyncState::Local,
        )
        .await;

        let older = survey("s1", "Stale", Some("2024-04-01T00:00:00Z"));
        assert!(!surveys.reconcile(older).await.unwrap());

        let kept = surveys.get_local("s1").await.unwrap().unwrap();
        assert_eq!(kept.field("name"), Some("Current"));
    }

    #[tokio::test]
    async fn test_remote_without_timestamp_does_not_overwrite() {
        let (surveys, _, _) = setup().await;
        seed_local(
            &surveys,
            survey("s1", "Local edit", None),
            "2024-01-01T00:00:00Z",
            SyncState::Synced,
        )
        .await;

        assert!(!surveys.reconcile(survey("s1", "Remote", None)).await.unwrap());
        let kept = surveys.get_local("s1").await.unwrap().unwrap();
        assert_eq!(kept.field("name"), Some("Local edit"));
    }

    #[tokio::test]
    async fn test_pull_reports_counts() {
        let (surveys, remote, _) = setup().await;
        remote.insert(survey("s1", "New", Some("2024-05-01T00:00:00Z")));
        remote.insert(survey("s2", "Untimed", None));
        seed_local(
            &surveys,
            survey("s2", "Mine", None),
            "2024-01-01T00:00:00Z",
            SyncState::Synced,
        )
        .await;

        let report = surveys.pull().await.unwrap();
        assert_eq!(
            report,
            PullReport {
                fetched: 2,
                applied: 1,
                skipped: 1
            }
        );
    }

    #[tokio::test]
    async fn test_remote_items_without_id_are_skipped() {
        let (surveys, remote, _) = setup().await;
        remote.insert(JsonEntity::new(json!({ "name": "Nameless" })));
        remote.insert(survey("s1", "Kitchen", Some("2024-05-01T00:00:00Z")));

        let report = surveys.pull().await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.skipped, 1);
        assert!(surveys.get_record("").await.unwrap().is_none());
        assert_eq!(surveys.store().count("surveys", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pull_surfaces_remote_failure() {
        let (surveys, remote, _) = setup().await;
        remote.fail(RemoteOp::List, vec!["unauthorized".to_string()]);

        let err = surveys.pull().await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(e) if e.errors == vec!["unauthorized".to_string()]));
    }

    // ========== use_list / use_get ==========

    #[tokio::test]
    async fn test_use_list_caches_remote_records_into_empty_store() {
        let (surveys, remote, clock) = setup().await;
        remote.insert(survey("1", "Loft", Some("2024-01-01T00:00:00Z")));

        let mut handle = surveys.use_list();
        handle.settle().await;

        assert!(!handle.is_loading());
        assert_eq!(handle.items(), vec![survey("1", "Loft", Some("2024-01-01T00:00:00Z"))]);

        let record = surveys.get_record("1").await.unwrap().unwrap();
        assert_eq!(record.sync_state, SyncState::Synced);
        assert_eq!(record.updated_at, clock.now());
    }

    #[tokio::test]
    async fn test_use_list_serves_local_when_remote_fails() {
        let (surveys, remote, _) = setup().await;
        seed_local(
            &surveys,
            survey("s1", "Cellar", None),
            "2024-01-01T00:00:00Z",
            SyncState::Local,
        )
        .await;
        remote.fail(RemoteOp::List, vec!["offline".to_string()]);

        let mut handle = surveys.use_list();
        handle.settle().await;

        assert!(!handle.is_loading());
        assert_eq!(handle.items(), vec![survey("s1", "Cellar", None)]);
    }

    #[tokio::test]
    async fn test_use_list_follows_local_writes() {
        let (surveys, _, _) = setup().await;
        let mut handle = surveys.use_list();
        handle.settle().await;
        assert!(handle.items().is_empty());

        surveys
            .upsert(survey("a", "A", None), UpsertOptions::local_only())
            .await
            .unwrap();
        surveys
            .upsert(survey("b", "B", None), UpsertOptions::local_only())
            .await
            .unwrap();
        surveys
            .upsert(survey("a", "A2", None), UpsertOptions::local_only())
            .await
            .unwrap();
        surveys.delete("b").await.unwrap();

        assert_eq!(handle.items(), vec![survey("a", "A2", None)]);
    }

    #[tokio::test]
    async fn test_dropping_handle_unsubscribes() {
        let (surveys, _, _) = setup().await;
        let handle = surveys.use_list();
        assert_eq!(surveys.store().notifier().listener_count("surveys"), 1);

        drop(handle);
        assert_eq!(surveys.store().notifier().listener_count("surveys"), 0);
    }

    #[tokio::test]
    async fn test_use_get_sees_local_only_upsert() {
        let (surveys, remote, _) = setup().await;
        surveys
            .upsert(survey("s1", "Draft", None), UpsertOptions::local_only())
            .await
            .unwrap();

        let mut handle = surveys.use_get("s1");
        handle.settle().await;

        assert_eq!(handle.item(), Some(survey("s1", "Draft", None)));
        assert_eq!(remote.call_count(RemoteOp::Create), 0);
        assert_eq!(remote.call_count(RemoteOp::Update), 0);
    }

    #[tokio::test]
    async fn test_use_get_applies_newer_remote() {
        let (surveys, remote, clock) = setup().await;
        seed_local(
            &surveys,
            survey("1", "Old", Some("2024-01-01T00:00:00Z")),
            "2024-01-01T00:00:00Z",
            SyncState::Synced,
        )
        .await;
        remote.insert(survey("1", "New", Some("2024-03-01T00:00:00Z")));

        let mut handle = surveys.use_get("1");
        handle.settle().await;

        assert_eq!(
            handle.item(),
            Some(survey("1", "New", Some("2024-03-01T00:00:00Z")))
        );
        let record = surveys.get_record("1").await.unwrap().unwrap();
        assert_eq!(record.sync_state, SyncState::Synced);
        assert_eq!(record.updated_at, clock.now());
    }

    #[tokio::test]
    async fn test_use_get_missing_everywhere() {
        let (surveys, _, _) = setup().await;
        let mut handle = surveys.use_get("ghost");
        handle.settle().await;

        assert!(!handle.is_loading());
        assert_eq!(handle.item(), None);
    }

    // ========== Writes ==========

    #[tokio::test]
    async fn test_upsert_writes_locally_before_remote_call() {
        let (surveys, remote, _) = setup().await;
        let creates_at_notify = Arc::new(Mutex::new(None));

        let sink = creates_at_notify.clone();
        let observed = remote.clone();
        let _sub = surveys.store().notifier().on_create("surveys", move |_| {
            *sink.lock() = Some(observed.call_count(RemoteOp::Create));
        });

        surveys
            .upsert(survey("s1", "Hall", None), UpsertOptions::default())
            .await
            .unwrap();

        assert_eq!(*creates_at_notify.lock(), Some(0));
        assert_eq!(remote.call_count(RemoteOp::Create), 1);
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let (surveys, remote, clock) = setup().await;

        let first = surveys
            .upsert(survey("s1", "Hall", None), UpsertOptions::default())
            .await
            .unwrap();
        assert_eq!(first.sync_state, SyncState::Synced);
        assert_eq!(remote.call_count(RemoteOp::Create), 1);

        clock.advance(chrono::Duration::seconds(5));
        surveys
            .upsert(survey("s1", "Hallway", None), UpsertOptions::default())
            .await
            .unwrap();

        assert_eq!(remote.call_count(RemoteOp::Create), 1);
        assert_eq!(remote.call_count(RemoteOp::Update), 1);
        assert_eq!(remote.record("s1"), Some(survey("s1", "Hallway", None)));

        let record = surveys.get_record("s1").await.unwrap().unwrap();
        assert_eq!(record.updated_at, clock.now());
    }

    #[tokio::test]
    async fn test_failed_create_leaves_record_local() {
        let (surveys, remote, _) = setup().await;
        remote.fail(RemoteOp::Create, vec!["validation failed".to_string()]);

        let err = surveys
            .upsert(survey("x", "Porch", None), UpsertOptions::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, SyncError::Remote(e) if e.errors == vec!["validation failed".to_string()])
        );

        let record = surveys.get_record("x").await.unwrap().unwrap();
        assert_eq!(record.sync_state, SyncState::Local);
        assert_eq!(record.data, survey("x", "Porch", None));
    }

    #[tokio::test]
    async fn test_upsert_of_existing_local_record_creates() {
        let (surveys, remote, _) = setup().await;
        seed_local(
            &surveys,
            survey("s1", "Draft", None),
            "2024-01-01T00:00:00Z",
            SyncState::Local,
        )
        .await;

        let record = surveys
            .upsert(survey("s1", "Final", None), UpsertOptions::default())
            .await
            .unwrap();

        assert_eq!(record.sync_state, SyncState::Synced);
        assert_eq!(remote.call_count(RemoteOp::Create), 1);
        assert_eq!(remote.call_count(RemoteOp::Update), 0);
        assert_eq!(remote.record("s1"), Some(survey("s1", "Final", None)));
    }

    #[tokio::test]
    async fn test_failed_update_marks_record_pending() {
        let (surveys, remote, _) = setup().await;
        surveys
            .upsert(survey("1", "Original", None), UpsertOptions::default())
            .await
            .unwrap();
        remote.fail(RemoteOp::Update, vec!["conflict".to_string()]);

        let err = surveys
            .upsert(survey("1", "Edited", None), UpsertOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));

        let record = surveys.get_record("1").await.unwrap().unwrap();
        assert_eq!(record.sync_state, SyncState::Local);
        assert_eq!(record.data, survey("1", "Edited", None));
        assert_eq!(remote.record("1"), Some(survey("1", "Original", None)));

        remote.clear_failures();
        let report = surveys.push_pending().await.unwrap();
        assert_eq!(report.pushed, 1);
        assert!(report.is_clean());
        assert_eq!(remote.call_count(RemoteOp::Create), 1);
        assert_eq!(remote.call_count(RemoteOp::Update), 2);
        assert_eq!(remote.record("1"), Some(survey("1", "Edited", None)));

        let record = surveys.get_record("1").await.unwrap().unwrap();
        assert_eq!(record.sync_state, SyncState::Synced);
    }

    #[tokio::test]
    async fn test_returned_record_matches_stored_timestamp() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let remote: Remote = Arc::new(MemoryCollection::new());
        let surveys = SyncCollection::new(store, remote, "surveys");

        let written = surveys
            .upsert(survey("s1", "Porch", None), UpsertOptions::local_only())
            .await
            .unwrap();

        assert_eq!(surveys.get_record("s1").await.unwrap(), Some(written));
    }

    #[tokio::test]
    async fn test_add_caches_remote_result() {
        let (surveys, remote, _) = setup().await;

        let created = surveys.add(survey("s1", "Attic", None)).await.unwrap();
        assert_eq!(created, survey("s1", "Attic", None));
        assert_eq!(remote.len(), 1);

        let record = surveys.get_record("s1").await.unwrap().unwrap();
        assert_eq!(record.sync_state, SyncState::Synced);
    }

    #[tokio::test]
    async fn test_add_failure_is_surfaced_and_not_cached() {
        let (surveys, remote, _) = setup().await;
        remote.fail(RemoteOp::Create, vec!["quota exceeded".to_string()]);

        assert!(surveys.add(survey("s1", "Attic", None)).await.is_err());
        assert!(surveys.get_record("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_synced_keeps_local_on_remote_failure() {
        let (surveys, remote, _) = setup().await;
        surveys
            .upsert(survey("s1", "Garage", None), UpsertOptions::default())
            .await
            .unwrap();
        remote.fail(RemoteOp::Delete, vec!["forbidden".to_string()]);

        let before = surveys.get_record("s1").await.unwrap().unwrap();
        assert!(surveys.delete("s1").await.is_err());
        assert_eq!(surveys.get_record("s1").await.unwrap(), Some(before));

        remote.clear_failures();
        assert!(surveys.delete("s1").await.unwrap());
        assert!(surveys.get_record("s1").await.unwrap().is_none());
        assert!(remote.is_empty());
    }

    #[tokio::test]
    async fn test_delete_local_record_skips_remote() {
        let (surveys, remote, _) = setup().await;
        surveys
            .upsert(survey("s1", "Shed", None), UpsertOptions::local_only())
            .await
            .unwrap();

        assert!(surveys.delete("s1").await.unwrap());
        assert_eq!(remote.call_count(RemoteOp::Delete), 0);
    }

    #[tokio::test]
    async fn test_delete_missing_is_a_no_op() {
        let (surveys, remote, _) = setup().await;

        assert!(!surveys.delete("nope").await.unwrap());
        assert!(!surveys.delete("nope").await.unwrap());
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_push_pending_creates_local_records() {
        let (surveys, remote, _) = setup().await;
        surveys
            .upsert(survey("a", "A", None), UpsertOptions::local_only())
            .await
            .unwrap();
        surveys
            .upsert(survey("b", "B", None), UpsertOptions::local_only())
            .await
            .unwrap();
        seed_local(
            &surveys,
            survey("c", "C", None),
            "2024-01-01T00:00:00Z",
            SyncState::Synced,
        )
        .await;

        let report = surveys.push_pending().await.unwrap();
        assert_eq!(report.pushed, 2);
        assert!(report.is_clean());
        assert_eq!(remote.call_count(RemoteOp::Create), 2);
        assert_eq!(
            surveys.store().count("surveys", Some(SyncState::Local)).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_push_pending_reports_failures() {
        let (surveys, remote, _) = setup().await;
        surveys
            .upsert(survey("a", "A", None), UpsertOptions::local_only())
            .await
            .unwrap();
        remote.fail(RemoteOp::Create, vec!["offline".to_string()]);

        let report = surveys.push_pending().await.unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "a");
    }
}
