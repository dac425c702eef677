//! In-process remote collection.
//!
//! Behaves like a strict CRUD service (create rejects existing ids, update
//! and delete reject missing ones) and records every call. Failures can be
//! injected per operation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use super::{RemoteCollection, RemoteOp};
use crate::error::{RemoteError, RemoteResult};
use crate::models::Entity;

/// One recorded adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub op: RemoteOp,
    pub id: Option<String>,
}

struct MemoryState<T> {
    records: BTreeMap<String, T>,
    calls: Vec<RemoteCall>,
    failures: HashMap<RemoteOp, Vec<String>>,
}

pub struct MemoryCollection<T> {
    state: Mutex<MemoryState<T>>,
}

impl<T: Entity> MemoryCollection<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                records: BTreeMap::new(),
                calls: Vec::new(),
                failures: HashMap::new(),
            }),
        }
    }

    pub fn with_records(records: impl IntoIterator<Item = T>) -> Self {
        let collection = Self::new();
        for record in records {
            collection.insert(record);
        }
        collection
    }

    /// Seeds a record directly, bypassing call tracking.
    pub fn insert(&self, record: T) {
        self.state
            .lock()
            .records
            .insert(record.id().to_string(), record);
    }

    pub fn record(&self, id: &str) -> Option<T> {
        self.state.lock().records.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, op: RemoteOp) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .count()
    }

    /// Makes every subsequent `op` call fail with `errors`.
    pub fn fail(&self, op: RemoteOp, errors: Vec<String>) {
        self.state.lock().failures.insert(op, errors);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    fn begin(&self, state: &mut MemoryState<T>, op: RemoteOp, id: Option<&str>) -> RemoteResult<()> {
        state.calls.push(RemoteCall {
            op,
            id: id.map(str::to_string),
        });
        match state.failures.get(&op) {
            Some(errors) => Err(RemoteError::new(errors.clone())),
            None => Ok(()),
        }
    }
}

impl<T: Entity> Default for MemoryCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> RemoteCollection<T> for MemoryCollection<T> {
    async fn list(&self) -> RemoteResult<Vec<T>> {
        let mut state = self.state.lock();
        self.begin(&mut state, RemoteOp::List, None)?;
        Ok(state.records.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> RemoteResult<Option<T>> {
        let mut state = self.state.lock();
        self.begin(&mut state, RemoteOp::Get, Some(id))?;
        Ok(state.records.get(id).cloned())
    }

    async fn create(&self, input: &T) -> RemoteResult<T> {
        let mut state = self.state.lock();
        self.begin(&mut state, RemoteOp::Create, Some(input.id()))?;
        if state.records.contains_key(input.id()) {
            return Err(RemoteError::message(format!(
                "record already exists: {}",
                input.id()
            )));
        }
        state.records.insert(input.id().to_string(), input.clone());
        Ok(input.clone())
    }

    async fn update(&self, input: &T) -> RemoteResult<T> {
        let mut state = self.state.lock();
        self.begin(&mut state, RemoteOp::Update, Some(input.id()))?;
        match state.records.get_mut(input.id()) {
            Some(existing) => {
                *existing = input.clone();
                Ok(input.clone())
            }
            None => Err(RemoteError::message(format!(
                "record not found: {}",
                input.id()
            ))),
        }
    }

    async fn delete(&self, id: &str) -> RemoteResult<T> {
        let mut state = self.state.lock();
        self.begin(&mut state, RemoteOp::Delete, Some(id))?;
        state
            .records
            .remove(id)
            .ok_or_else(|| RemoteError::message(format!("record not found: {}", id)))
    }
}
