//! Object storage for uploaded images and rendered reports.
//!
//! Provides an `ObjectStore` trait with implementations for:
//! - **HTTP**: storage-bucket REST API, public URLs as references
//! - **Memory**: process-local map with `memory://` references
//!
//! Writes are upserts: putting the same name twice replaces the object.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

// ============================================================================
// ObjectStore trait
// ============================================================================

/// Retrievable reference to a stored object (a public URL for HTTP storage).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef(pub String);

impl ObjectRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("Missing storage service key")]
    MissingServiceKey,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `name` (`{bucket}/{path}`), replacing any existing
    /// object, and return its reference.
    async fn put(
        &self,
        name: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<ObjectRef, ObjectStoreError>;

    async fn get(&self, reference: &str) -> Result<Bytes, ObjectStoreError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// HttpObjectStore
// ============================================================================

#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    base_url: String,
    service_key: String,
}

impl HttpObjectStore {
    pub fn new(base_url: String, service_key: String) -> Result<Self, ObjectStoreError> {
        if service_key.is_empty() {
            return Err(ObjectStoreError::MissingServiceKey);
        }

        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
        })
    }

    pub fn public_url(&self, name: &str) -> String {
        format!("{}/object/public/{}", self.base_url, name)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        name: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<ObjectRef, ObjectStoreError> {
        let url = format!("{}/object/{}", self.base_url, name);
        let size = bytes.len();

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.service_key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), object = %name, message = %message, "Object upload failed");
            return Err(ObjectStoreError::Api {
                status: status.as_u16(),
                message,
            });
        }

        tracing::debug!(object = %name, size, "Object stored");
        Ok(ObjectRef(self.public_url(name)))
    }

    async fn get(&self, reference: &str) -> Result<Bytes, ObjectStoreError> {
        let response = self.client.get(reference).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound(reference.to_string()));
        }
        if !status.is_success() {
            return Err(ObjectStoreError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.bytes().await?)
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ============================================================================
// InMemoryObjectStore
// ============================================================================

pub const MEMORY_SCHEME: &str = "memory://";

#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, (Bytes, String)>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn content_type(&self, reference: &str) -> Option<String> {
        let name = reference.strip_prefix(MEMORY_SCHEME)?;
        self.objects.read().await.get(name).map(|(_, ct)| ct.clone())
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(
        &self,
        name: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<ObjectRef, ObjectStoreError> {
        self.objects
            .write()
            .await
            .insert(name.to_string(), (bytes, content_type.to_string()));
        Ok(ObjectRef(format!("{}{}", MEMORY_SCHEME, name)))
    }

    async fn get(&self, reference: &str) -> Result<Bytes, ObjectStoreError> {
        let name = reference
            .strip_prefix(MEMORY_SCHEME)
            .ok_or_else(|| ObjectStoreError::NotFound(reference.to_string()))?;
        self.objects
            .read()
            .await
            .get(name)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| ObjectStoreError::NotFound(reference.to_string()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// TESTS
// ============================================================================
