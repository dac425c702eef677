//! Transport for image content.
//!
//! Metadata travels through the regular remote collection; the binary
//! content goes through an [`ImageUploader`], which reports progress as a
//! percentage while the body is sent.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use reqwest::{header, Body, Client};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{RemoteError, RemoteResult};

/// Receives upload progress, 0 to 100.
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[async_trait]
pub trait ImageUploader: Send + Sync + 'static {
    /// Stores `bytes` under the object key `path`.
    async fn upload(
        &self,
        path: &str,
        content_type: &str,
        bytes: Vec<u8>,
        progress: Option<ProgressCallback>,
    ) -> RemoteResult<()>;
}

#[async_trait]
impl<U: ImageUploader> ImageUploader for Arc<U> {
    async fn upload(
        &self,
        path: &str,
        content_type: &str,
        bytes: Vec<u8>,
        progress: Option<ProgressCallback>,
    ) -> RemoteResult<()> {
        (**self).upload(path, content_type, bytes, progress).await
    }
}

fn percent(sent: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((sent.min(total) * 100) / total) as u8
}

// ============================================================================
// HTTP
// ============================================================================

/// Uploads with `PUT {base_url}/{path}`, streaming the body in chunks.
#[derive(Clone)]
pub struct HttpImageUploader {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    chunk_size: usize,
}

impl HttpImageUploader {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Each path segment is percent-encoded; separators are kept.
    pub fn object_url(&self, path: &str) -> String {
        let encoded: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        format!("{}/{}", self.base_url.trim_end_matches('/'), encoded.join("/"))
    }
}

impl std::fmt::Debug for HttpImageUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpImageUploader")
            .field("base_url", &self.base_url)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

#[async_trait]
impl ImageUploader for HttpImageUploader {
    async fn upload(
        &self,
        path: &str,
        content_type: &str,
        bytes: Vec<u8>,
        progress: Option<ProgressCallback>,
    ) -> RemoteResult<()> {
        let total = bytes.len();
        let chunks: Vec<Vec<u8>> = bytes.chunks(self.chunk_size).map(<[u8]>::to_vec).collect();

        let mut sent = 0usize;
        let reporter = progress.clone();
        let body = stream::iter(chunks).map(move |chunk| {
            sent += chunk.len();
            if let Some(report) = &reporter {
                report(percent(sent, total));
            }
            Ok::<_, std::io::Error>(chunk)
        });

        let mut request = self
            .client
            .put(self.object_url(path))
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, total)
            .body(Body::wrap_stream(body));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::message(format!("upload of {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::message(format!(
                "upload of {} failed: server returned status {}",
                path, status
            )));
        }

        if let Some(report) = &progress {
            report(100);
        }
        tracing::debug!("Uploaded {} ({} bytes)", path, total);
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
struct MemoryObjects {
    objects: HashMap<String, Vec<u8>>,
    uploads: usize,
    failure: Option<Vec<String>>,
}

/// Keeps uploaded objects in memory. Failures can be switched on and off.
#[derive(Default)]
pub struct MemoryUploader {
    state: Mutex<MemoryObjects>,
}

impl MemoryUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent upload fail with `errors`.
    pub fn fail(&self, errors: Vec<String>) {
        self.state.lock().failure = Some(errors);
    }

    pub fn recover(&self) {
        self.state.lock().failure = None;
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().objects.get(path).cloned()
    }

    /// Number of upload attempts, failed ones included.
    pub fn upload_count(&self) -> usize {
        self.state.lock().uploads
    }
}

#[async_trait]
impl ImageUploader for MemoryUploader {
    async fn upload(
        &self,
        path: &str,
        _content_type: &str,
        bytes: Vec<u8>,
        progress: Option<ProgressCallback>,
    ) -> RemoteResult<()> {
        {
            let mut state = self.state.lock();
            state.uploads += 1;
            if let Some(errors) = &state.failure {
                return Err(RemoteError::new(errors.clone()));
            }
        }

        if let Some(report) = &progress {
            report(50);
        }
        self.state.lock().objects.insert(path.to_string(), bytes);
        if let Some(report) = &progress {
            report(100);
        }
        Ok(())
    }
}
