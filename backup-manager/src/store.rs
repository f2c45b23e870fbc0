//! Metadata store: a persistent key to bytes map.
//!
//! The store knows nothing about the records it holds. The dispatcher owns
//! the key schema and value encoding (see [`crate::record`]).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::StoreError;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Minimal persistent key/value contract used by the dispatcher.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Read a value. A missing key is `Ok(None)`, not an error.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()>;

    /// Flush and release the store. Later calls fail with [`StoreError::Closed`].
    async fn close(&self) -> StoreResult<()>;
}

/// In-memory store, for tests and ephemeral runs.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<Option<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Some(HashMap::new())),
        }
    }

    /// Number of stored keys (zero once closed).
    pub async fn len(&self) -> usize {
        self.entries.read().await.as_ref().map_or(0, HashMap::len)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        let entries = entries.as_ref().ok_or(StoreError::Closed)?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        let entries = entries.as_mut().ok_or(StoreError::Closed)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        self.entries.write().await.take();
        Ok(())
    }
}

/// Write-through store persisted as a single JSON document.
///
/// Values are base64-encoded. Every `set` rewrites the document through a
/// temporary file and an atomic rename, holding the write lock throughout.
///
/// Write cost therefore grows with the whole store: an initial scan of N
/// files across P providers writes O(N²·P) bytes. Fine for the metadata of a
/// few thousand files; larger trees want a store with per-key writes behind
/// [`MetadataStore`].
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<Option<BTreeMap<String, Vec<u8>>>>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading existing state if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = if fs::try_exists(&path).await? {
            let content = fs::read(&path).await?;
            decode(&content)?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            BTreeMap::new()
        };

        info!(
            "Opened metadata store at {} ({} keys)",
            path.display(),
            entries.len()
        );
        Ok(Self {
            path,
            entries: RwLock::new(Some(entries)),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &BTreeMap<String, Vec<u8>>) -> StoreResult<()> {
        let encoded: BTreeMap<&str, String> = entries
            .iter()
            .map(|(key, value)| (key.as_str(), STANDARD.encode(value)))
            .collect();
        let content = serde_json::to_vec_pretty(&encoded)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!("Persisted {} keys to {}", entries.len(), self.path.display());
        Ok(())
    }
}

fn decode(content: &[u8]) -> StoreResult<BTreeMap<String, Vec<u8>>> {
    let encoded: BTreeMap<String, String> =
        serde_json::from_slice(content).map_err(|e| StoreError::Corrupt(e.to_string()))?;

    encoded
        .into_iter()
        .map(|(key, value)| {
            STANDARD
                .decode(value)
                .map(|bytes| (key, bytes))
                .map_err(|e| StoreError::Corrupt(e.to_string()))
        })
        .collect()
}

#[async_trait]
impl MetadataStore for JsonFileStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        let entries = entries.as_ref().ok_or(StoreError::Closed)?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        // Held across the write so concurrent sets persist in order.
        let mut guard = self.entries.write().await;
        let entries = guard.as_mut().ok_or(StoreError::Closed)?;
        entries.insert(key.to_string(), value);
        self.persist(entries).await
    }

    async fn close(&self) -> StoreResult<()> {
        if let Some(entries) = self.entries.write().await.take() {
            self.persist(&entries).await?;
            info!("Closed metadata store at {}", self.path.display());
        }
        Ok(())
    }
}
