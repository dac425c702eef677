//! Change notifications for local store mutations.
//!
//! Listeners are registered per collection and called synchronously, in
//! registration order, after the mutating write has committed. A listener
//! never sees events for another collection.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::models::LocalRecord;

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A committed mutation of one row.
///
/// `record` carries the new full row for creates and updates and is `None`
/// for deletes.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub collection: String,
    pub kind: ChangeKind,
    pub id: String,
    pub record: Option<LocalRecord<Value>>,
}

type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<String, Vec<(u64, Listener)>>>,
}

/// Fan-out of store mutations to in-process observers.
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    registry: Arc<Registry>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for every change in `collection`.
    pub fn on_change<F>(&self, collection: &str, listener: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .listeners
            .write()
            .entry(collection.to_string())
            .or_default()
            .push((id, Arc::new(listener)));

        Subscription {
            registry: Arc::downgrade(&self.registry),
            collection: collection.to_string(),
            id,
        }
    }

    pub fn on_create<F>(&self, collection: &str, listener: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.on_kind(collection, ChangeKind::Created, listener)
    }

    pub fn on_update<F>(&self, collection: &str, listener: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.on_kind(collection, ChangeKind::Updated, listener)
    }

    pub fn on_delete<F>(&self, collection: &str, listener: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.on_kind(collection, ChangeKind::Deleted, listener)
    }

    fn on_kind<F>(&self, collection: &str, kind: ChangeKind, listener: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.on_change(collection, move |event| {
            if event.kind == kind {
                listener(event);
            }
        })
    }

    /// Number of live listeners on `collection`.
    pub fn listener_count(&self, collection: &str) -> usize {
        self.registry
            .listeners
            .read()
            .get(collection)
            .map_or(0, Vec::len)
    }

    pub(crate) fn notify(&self, event: &ChangeEvent) {
        // Snapshot so listeners may subscribe or unsubscribe while running.
        let listeners: Vec<Listener> = match self.registry.listeners.read().get(&event.collection)
        {
            Some(entries) => entries.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return,
        };

        for listener in listeners {
            listener(event);
        }
    }
}

/// Keeps a listener registered; dropping it unregisters.
#[must_use = "the listener is removed when the subscription is dropped"]
pub struct Subscription {
    registry: Weak<Registry>,
    collection: String,
    id: u64,
}

impl Subscription {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut listeners = registry.listeners.write();
        if let Some(entries) = listeners.get_mut(&self.collection) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                listeners.remove(&self.collection);
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("collection", &self.collection)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn event(collection: &str, kind: ChangeKind, id: &str) -> ChangeEvent {
        ChangeEvent {
            collection: collection.to_string(),
            kind,
            id: id.to_string(),
            record: None,
        }
    }

    #[test]
    fn test_listeners_are_scoped_to_collection() {
        let notifier = ChangeNotifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let _sub = notifier.on_change("surveys", move |e| sink.lock().push(e.id.clone()));

        notifier.notify(&event("surveys", ChangeKind::Created, "s1"));
        notifier.notify(&event("phrases", ChangeKind::Created, "p1"));

        assert_eq!(*seen.lock(), vec!["s1".to_string()]);
    }

    #[test]
    fn test_kind_filters() {
        let notifier = ChangeNotifier::new();
        let deletes = Arc::new(Mutex::new(0));

        let counter = deletes.clone();
        let _sub = notifier.on_delete("surveys", move |_| *counter.lock() += 1);

        notifier.notify(&event("surveys", ChangeKind::Created, "a"));
        notifier.notify(&event("surveys", ChangeKind::Updated, "a"));
        notifier.notify(&event("surveys", ChangeKind::Deleted, "a"));

        assert_eq!(*deletes.lock(), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let notifier = ChangeNotifier::new();
        let calls = Arc::new(Mutex::new(0));

        let counter = calls.clone();
        let sub = notifier.on_change("surveys", move |_| *counter.lock() += 1);
        assert_eq!(notifier.listener_count("surveys"), 1);

        notifier.notify(&event("surveys", ChangeKind::Created, "a"));
        sub.unsubscribe();
        notifier.notify(&event("surveys", ChangeKind::Created, "b"));

        assert_eq!(*calls.lock(), 1);
        assert_eq!(notifier.listener_count("surveys"), 0);
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let notifier = ChangeNotifier::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = order.clone();
        let _a = notifier.on_change("surveys", move |_| first.lock().push("first"));
        let second = order.clone();
        let _b = notifier.on_change("surveys", move |_| second.lock().push("second"));

        notifier.notify(&event("surveys", ChangeKind::Updated, "a"));
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_listener_may_unsubscribe_others_during_delivery() {
        let notifier = ChangeNotifier::new();
        let held: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot = held.clone();
        let _dropper = notifier.on_change("surveys", move |_| {
            slot.lock().take();
        });
        *held.lock() = Some(notifier.on_change("surveys", |_| {}));
        assert_eq!(notifier.listener_count("surveys"), 2);

        notifier.notify(&event("surveys", ChangeKind::Created, "a"));
        assert_eq!(notifier.listener_count("surveys"), 1);
    }
}
