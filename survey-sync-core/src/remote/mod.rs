//! Remote collection contract.
//!
//! The remote API is an opaque CRUD service. The engine only needs the five
//! operations below; the transport behind them is up to the implementation.

mod http;
mod memory;

pub use http::HttpCollection;
pub use memory::{MemoryCollection, RemoteCall};

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

use crate::error::{RemoteError, RemoteResult};
use crate::models::Entity;

/// CRUD operations on one remote collection.
#[async_trait]
pub trait RemoteCollection<T: Entity>: Send + Sync + 'static {
    /// All records visible to the caller.
    async fn list(&self) -> RemoteResult<Vec<T>>;

    /// A single record, `None` when the remote has no such id.
    async fn get(&self, id: &str) -> RemoteResult<Option<T>>;

    async fn create(&self, input: &T) -> RemoteResult<T>;

    async fn update(&self, input: &T) -> RemoteResult<T>;

    async fn delete(&self, id: &str) -> RemoteResult<T>;
}

#[async_trait]
impl<T: Entity, R: RemoteCollection<T>> RemoteCollection<T> for Arc<R> {
    async fn list(&self) -> RemoteResult<Vec<T>> {
        (**self).list().await
    }

    async fn get(&self, id: &str) -> RemoteResult<Option<T>> {
        (**self).get(id).await
    }

    async fn create(&self, input: &T) -> RemoteResult<T> {
        (**self).create(input).await
    }

    async fn update(&self, input: &T) -> RemoteResult<T> {
        (**self).update(input).await
    }

    async fn delete(&self, id: &str) -> RemoteResult<T> {
        (**self).delete(id).await
    }
}

/// Remote operation names, for logs and call tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    List,
    Get,
    Create,
    Update,
    Delete,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteOp::List => write!(f, "list"),
            RemoteOp::Get => write!(f, "get"),
            RemoteOp::Create => write!(f, "create"),
            RemoteOp::Update => write!(f, "update"),
            RemoteOp::Delete => write!(f, "delete"),
        }
    }
}

/// Wire shape of a remote response: `{"data": ..., "errors": [...]}`.
///
/// A non-empty `errors` list means failure regardless of `data`.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "D: Deserialize<'de>"))]
pub struct RemoteEnvelope<D> {
    #[serde(default)]
    pub data: Option<D>,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
}

impl<D> RemoteEnvelope<D> {
    /// Converts to a result; `Ok(None)` when the call succeeded without data.
    pub fn into_result(self) -> RemoteResult<Option<D>> {
        match self.errors {
            Some(errors) if !errors.is_empty() => Err(RemoteError::new(errors)),
            _ => Ok(self.data),
        }
    }

    /// Like `into_result`, but a missing `data` is also a failure.
    pub fn require_data(self, op: RemoteOp) -> RemoteResult<D> {
        self.into_result()?
            .ok_or_else(|| RemoteError::message(format!("{} returned no data", op)))
    }
}
