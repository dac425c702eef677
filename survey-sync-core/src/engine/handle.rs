//! Live read handles returned by `use_list` and `use_get`.
//!
//! A handle owns an in-memory projection of the local table that is kept
//! current by store change events, plus the background tasks that load it
//! and reconcile it with the remote. Dropping the handle unsubscribes and
//! aborts whatever background work is still running.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::Entity;
use crate::store::{ChangeEvent, ChangeKind, Subscription};

/// Projection state shared between a handle, its listener and its tasks.
pub(crate) struct Projection<S> {
    state: Mutex<S>,
    version: watch::Sender<u64>,
}

impl<S> Projection<S> {
    pub(crate) fn new(state: S) -> Arc<Self> {
        let (version, _) = watch::channel(0);
        Arc::new(Self {
            state: Mutex::new(state),
            version,
        })
    }

    /// Mutates the state and wakes anyone waiting in `changed()`.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let result = f(&mut self.state.lock());
        self.version.send_modify(|v| *v = v.wrapping_add(1));
        result
    }

    fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.state.lock())
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

fn decode_event<T: Entity>(event: &ChangeEvent) -> Option<T> {
    let record = event.record.as_ref()?;
    match serde_json::from_value(record.data.clone()) {
        Ok(item) => Some(item),
        Err(e) => {
            tracing::warn!(
                collection = %event.collection,
                id = %event.id,
                "Ignoring change event with undecodable data: {}",
                e
            );
            None
        }
    }
}

// ============================================================================
// List projection
// ============================================================================

pub(crate) struct ListState<T> {
    is_loading: bool,
    items: Vec<T>,
    // Events seen before the first full read landed, replayed on top of it.
    buffered: Vec<ChangeEvent>,
}

impl<T: Entity> ListState<T> {
    pub(crate) fn new() -> Self {
        Self {
            is_loading: true,
            items: Vec::new(),
            buffered: Vec::new(),
        }
    }

    pub(crate) fn on_event(&mut self, event: &ChangeEvent) {
        if self.is_loading {
            self.buffered.push(event.clone());
        } else {
            self.apply(event);
        }
    }

    /// Takes the initial table read, unless a later full read already landed.
    pub(crate) fn load(&mut self, items: Vec<T>) {
        if self.is_loading {
            self.replace(items);
        }
    }

    /// Replaces the projection wholesale with a full table read.
    pub(crate) fn replace(&mut self, items: Vec<T>) {
        self.items = items;
        self.finish_loading();
    }

    pub(crate) fn finish_loading(&mut self) {
        if !self.is_loading {
            return;
        }
        self.is_loading = false;
        for event in std::mem::take(&mut self.buffered) {
            self.apply(&event);
        }
    }

    fn apply(&mut self, event: &ChangeEvent) {
        match event.kind {
            ChangeKind::Deleted => self.items.retain(|item| item.id() != event.id),
            ChangeKind::Created | ChangeKind::Updated => {
                let Some(item) = decode_event::<T>(event) else {
                    return;
                };
                match self.items.iter_mut().find(|i| i.id() == event.id) {
                    Some(existing) => *existing = item,
                    None => self.items.push(item),
                }
            }
        }
    }
}

/// Live view of every record in a collection.
pub struct ListHandle<T> {
    projection: Arc<Projection<ListState<T>>>,
    changes: watch::Receiver<u64>,
    tasks: Vec<JoinHandle<()>>,
    _subscription: Subscription,
}

impl<T: Entity> ListHandle<T> {
    pub(crate) fn new(
        projection: Arc<Projection<ListState<T>>>,
        subscription: Subscription,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        let changes = projection.changes();
        Self {
            projection,
            changes,
            tasks,
            _subscription: subscription,
        }
    }

    /// True until the first local read completes.
    pub fn is_loading(&self) -> bool {
        self.projection.read(|s| s.is_loading)
    }

    pub fn items(&self) -> Vec<T> {
        self.projection.read(|s| s.items.clone())
    }

    pub fn snapshot(&self) -> (bool, Vec<T>) {
        self.projection.read(|s| (s.is_loading, s.items.clone()))
    }

    /// Waits until the projection changes.
    pub async fn changed(&mut self) {
        let _ = self.changes.changed().await;
    }

    /// Waits for the initial load and the background reconciliation to finish.
    pub async fn settle(&mut self) {
        settle_tasks(&mut self.tasks).await;
    }
}

impl<T> Drop for ListHandle<T> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

// ============================================================================
// Single-record projection
// ============================================================================

pub(crate) struct ItemState<T> {
    is_loading: bool,
    item: Option<T>,
    buffered: Vec<ChangeEvent>,
}

impl<T: Entity> ItemState<T> {
    pub(crate) fn new() -> Self {
        Self {
            is_loading: true,
            item: None,
            buffered: Vec::new(),
        }
    }

    /// Caller has already filtered the event to this record's id.
    pub(crate) fn on_event(&mut self, event: &ChangeEvent) {
        if self.is_loading {
            self.buffered.push(event.clone());
        } else {
            self.apply(event);
        }
    }

    pub(crate) fn load(&mut self, item: Option<T>) {
        if self.is_loading {
            self.replace(item);
        }
    }

    pub(crate) fn replace(&mut self, item: Option<T>) {
        self.item = item;
        self.finish_loading();
    }

    pub(crate) fn finish_loading(&mut self) {
        if !self.is_loading {
            return;
        }
        self.is_loading = false;
        for event in std::mem::take(&mut self.buffered) {
            self.apply(&event);
        }
    }

    fn apply(&mut self, event: &ChangeEvent) {
        match event.kind {
            ChangeKind::Deleted => self.item = None,
            ChangeKind::Created | ChangeKind::Updated => {
                if let Some(item) = decode_event::<T>(event) {
                    self.item = Some(item);
                }
            }
        }
    }
}

/// Live view of one record.
pub struct GetHandle<T> {
    id: String,
    projection: Arc<Projection<ItemState<T>>>,
    changes: watch::Receiver<u64>,
    tasks: Vec<JoinHandle<()>>,
    _subscription: Subscription,
}

impl<T: Entity> GetHandle<T> {
    pub(crate) fn new(
        id: String,
        projection: Arc<Projection<ItemState<T>>>,
        subscription: Subscription,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        let changes = projection.changes();
        Self {
            id,
            projection,
            changes,
            tasks,
            _subscription: subscription,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_loading(&self) -> bool {
        self.projection.read(|s| s.is_loading)
    }

    pub fn item(&self) -> Option<T> {
        self.projection.read(|s| s.item.clone())
    }

    pub fn snapshot(&self) -> (bool, Option<T>) {
        self.projection.read(|s| (s.is_loading, s.item.clone()))
    }

    pub async fn changed(&mut self) {
        let _ = self.changes.changed().await;
    }

    pub async fn settle(&mut self) {
        settle_tasks(&mut self.tasks).await;
    }
}

impl<T> Drop for GetHandle<T> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn settle_tasks(tasks: &mut Vec<JoinHandle<()>>) {
    for task in tasks.drain(..) {
        if let Err(e) = task.await {
            if e.is_panic() {
                tracing::error!("Background sync task panicked: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JsonEntity, LocalRecord, SyncState};
    use chrono::Utc;
    use serde_json::json;

    fn entity(id: &str, name: &str) -> JsonEntity {
        JsonEntity::new(json!({ "id": id, "name": name }))
    }

    fn upsert_event(kind: ChangeKind, id: &str, name: &str) -> ChangeEvent {
        ChangeEvent {
            collection: "surveys".to_string(),
            kind,
            id: id.to_string(),
            record: Some(LocalRecord::new(
                id,
                Utc::now(),
                SyncState::Local,
                json!({ "id": id, "name": name }),
            )),
        }
    }

    fn delete_event(id: &str) -> ChangeEvent {
        ChangeEvent {
            collection: "surveys".to_string(),
            kind: ChangeKind::Deleted,
            id: id.to_string(),
            record: None,
        }
    }

    #[test]
    fn test_list_applies_events_incrementally_after_load() {
        let mut state: ListState<JsonEntity> = ListState::new();
        state.replace(vec![entity("1", "a"), entity("2", "b")]);

        state.on_event(&upsert_event(ChangeKind::Created, "3", "c"));
        state.on_event(&upsert_event(ChangeKind::Updated, "1", "a2"));
        state.on_event(&delete_event("2"));

        assert_eq!(state.items, vec![entity("1", "a2"), entity("3", "c")]);
    }

    #[test]
    fn test_list_replays_events_buffered_during_load() {
        let mut state: ListState<JsonEntity> = ListState::new();
        state.on_event(&upsert_event(ChangeKind::Created, "2", "b"));
        state.on_event(&delete_event("1"));
        assert!(state.items.is_empty());

        // The read may or may not have observed those writes
        state.replace(vec![entity("1", "a"), entity("2", "b")]);

        assert!(!state.is_loading);
        assert_eq!(state.items, vec![entity("2", "b")]);
    }

    #[test]
    fn test_list_create_for_known_id_replaces() {
        let mut state: ListState<JsonEntity> = ListState::new();
        state.replace(vec![entity("1", "a")]);
        state.on_event(&upsert_event(ChangeKind::Created, "1", "a2"));
        assert_eq!(state.items, vec![entity("1", "a2")]);
    }

    #[test]
    fn test_item_tracks_updates_and_delete() {
        let mut state: ItemState<JsonEntity> = ItemState::new();
        state.on_event(&upsert_event(ChangeKind::Updated, "1", "buffered"));
        state.replace(Some(entity("1", "read")));
        assert_eq!(state.item, Some(entity("1", "buffered")));

        state.on_event(&delete_event("1"));
        assert_eq!(state.item, None);
    }

    #[tokio::test]
    async fn test_changed_wakes_on_update() {
        let projection = Projection::new(ListState::<JsonEntity>::new());
        let mut changes = projection.changes();

        projection.update(|s| s.replace(vec![entity("1", "a")]));

        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow(), 1);
    }
}
