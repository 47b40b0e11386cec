//! File-storage collaborator consumed by media sync. The real backend
//! lives outside this workspace; the engine only needs "storage key in,
//! byte buffer out".

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("stored file `{0}` not found")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn download(&self, storage_key: &str) -> Result<Vec<u8>, StorageError>;
}

/// Map-backed store used by tests and local development.
#[derive(Default)]
pub struct InMemoryFileStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryFileStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn insert(&self, storage_key: impl Into<String>, bytes: Vec<u8>) {
        self.files.write().await.insert(storage_key.into(), bytes);
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn download(&self, storage_key: &str) -> Result<Vec<u8>, StorageError> {
        self.files
            .read()
            .await
            .get(storage_key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(storage_key.to_string()))
    }
}
