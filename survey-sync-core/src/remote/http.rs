//! HTTP/JSON remote collection.
//!
//! Routes, relative to the base URL:
//! - `GET    /{collection}`       list
//! - `GET    /{collection}/{id}`  get
//! - `POST   /{collection}`       create
//! - `PUT    /{collection}/{id}`  update
//! - `DELETE /{collection}/{id}`  delete
//!
//! Every response body is a `{"data": ..., "errors": [...]}` envelope.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

use super::{RemoteCollection, RemoteEnvelope, RemoteOp};
use crate::error::{RemoteError, RemoteResult};
use crate::models::Entity;

pub struct HttpCollection<T> {
    client: Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for HttpCollection<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            collection: self.collection.clone(),
            api_key: self.api_key.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for HttpCollection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCollection")
            .field("base_url", &self.base_url)
            .field("collection", &self.collection)
            .finish()
    }
}

impl<T: Entity> HttpCollection<T> {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            collection: collection.into(),
            api_key: None,
            _entity: PhantomData,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn collection_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.collection)
        )
    }

    pub fn record_url(&self, id: &str) -> String {
        format!("{}/{}", self.collection_url(), urlencoding::encode(id))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send<D: DeserializeOwned>(
        &self,
        op: RemoteOp,
        builder: RequestBuilder,
    ) -> RemoteResult<RemoteEnvelope<D>> {
        let response = builder
            .send()
            .await
            .map_err(|e| RemoteError::message(format!("{} request failed: {}", op, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::message(format!("{} response unreadable: {}", op, e)))?;

        if !status.is_success() {
            // Prefer the server's own error list when it sent one
            if let Ok(envelope) = serde_json::from_str::<RemoteEnvelope<serde_json::Value>>(&body) {
                envelope.into_result()?;
            }
            return Err(RemoteError::message(format!(
                "{} failed: server returned status {}",
                op, status
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| RemoteError::message(format!("{} response invalid: {}", op, e)))
    }
}

#[async_trait]
impl<T: Entity> RemoteCollection<T> for HttpCollection<T> {
    async fn list(&self) -> RemoteResult<Vec<T>> {
        let url = self.collection_url();
        let envelope: RemoteEnvelope<Vec<T>> = self
            .send(RemoteOp::List, self.request(Method::GET, &url))
            .await?;
        Ok(envelope.into_result()?.unwrap_or_default())
    }

    async fn get(&self, id: &str) -> RemoteResult<Option<T>> {
        let url = self.record_url(id);
        let envelope: RemoteEnvelope<T> = self
            .send(RemoteOp::Get, self.request(Method::GET, &url))
            .await?;
        envelope.into_result()
    }

    async fn create(&self, input: &T) -> RemoteResult<T> {
        let url = self.collection_url();
        let envelope: RemoteEnvelope<T> = self
            .send(RemoteOp::Create, self.request(Method::POST, &url).json(input))
            .await?;
        envelope.require_data(RemoteOp::Create)
    }

    async fn update(&self, input: &T) -> RemoteResult<T> {
        let url = self.record_url(input.id());
        let envelope: RemoteEnvelope<T> = self
            .send(RemoteOp::Update, self.request(Method::PUT, &url).json(input))
            .await?;
        envelope.require_data(RemoteOp::Update)
    }

    async fn delete(&self, id: &str) -> RemoteResult<T> {
        let url = self.record_url(id);
        let envelope: RemoteEnvelope<T> = self
            .send(RemoteOp::Delete, self.request(Method::DELETE, &url))
            .await?;
        envelope.require_data(RemoteOp::Delete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JsonEntity;

    #[test]
    fn test_urls_encode_segments() {
        let remote: HttpCollection<JsonEntity> =
            HttpCollection::new("https://api.example.com/v1/", "surveys");
        assert_eq!(remote.collection_url(), "https://api.example.com/v1/surveys");
        assert_eq!(
            remote.record_url("a b/c"),
            "https://api.example.com/v1/surveys/a%20b%2Fc"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_remote_error() {
        // Port 9 (discard) on localhost is closed on test machines.
        let remote: HttpCollection<JsonEntity> = HttpCollection::new("http://127.0.0.1:9", "surveys");
        let err = remote.list().await.unwrap_err();
        assert!(err.errors[0].starts_with("list request failed"));
    }
}
