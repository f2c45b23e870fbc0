//! Backup dispatcher.
//!
//! For every event from the monitor, each provider whose directory list
//! contains the event root gets its own task. A task checks the stored
//! checksum for (provider, path), uploads only when it differs, records the
//! outcome, and sends exactly one [`BackupResult`] unless it skipped.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use keeper_fs_monitor::{Event, Subscriber};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::error::{BackupError, Result};
use crate::providers::Provider;
use crate::record::{FileRecord, PROVIDERS_KEY, ProviderMetaInfo, file_record_key, meta_info_key};
use crate::result::BackupResult;
use crate::store::MetadataStore;

/// An upload that has been decided on but not yet recorded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InFlight {
    provider: String,
    path: PathBuf,
    checksum: String,
}

struct Inner {
    store: Arc<dyn MetadataStore>,
    providers: BTreeMap<String, Arc<dyn Provider>>,

    /// Guards every metadata read-modify-write. Never held across an upload.
    bookkeeping: Mutex<HashSet<InFlight>>,

    /// `None` once shutdown has begun.
    results: RwLock<Option<mpsc::Sender<BackupResult>>>,

    tasks: TaskTracker,
}

/// Deduplicating, concurrent backup dispatcher.
///
/// Register it with the monitor as a [`Subscriber`]; read outcomes from the
/// receiver returned by [`BackupManager::new`].
#[derive(Clone)]
pub struct BackupManager {
    inner: Arc<Inner>,
}

impl BackupManager {
    /// Create a dispatcher over `providers`, returning it with the result receiver.
    ///
    /// Every provider directory is registered in its meta info with a zero
    /// baseline, and the provider names are recorded in the store.
    pub async fn new(
        store: Arc<dyn MetadataStore>,
        providers: Vec<Arc<dyn Provider>>,
        config: DispatcherConfig,
    ) -> Result<(Self, mpsc::Receiver<BackupResult>)> {
        let mut registry = BTreeMap::new();
        for provider in providers {
            let name = provider.name().to_string();
            if registry.insert(name.clone(), provider).is_some() {
                return Err(BackupError::Config(format!("duplicate provider name: {name}")));
            }
        }

        let (tx, rx) = mpsc::channel(config.result_capacity.max(1));
        let manager = Self {
            inner: Arc::new(Inner {
                store,
                providers: registry,
                bookkeeping: Mutex::new(HashSet::new()),
                results: RwLock::new(Some(tx)),
                tasks: TaskTracker::new(),
            }),
        };

        manager.bootstrap().await?;
        info!(
            "Backup manager initialized with {} providers",
            manager.inner.providers.len()
        );
        Ok((manager, rx))
    }

    async fn bootstrap(&self) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.bookkeeping.lock().await;

        for (name, provider) in &inner.providers {
            let key = meta_info_key(name);
            let mut meta = inner
                .read_json::<ProviderMetaInfo>(&key)
                .await?
                .unwrap_or_else(|| ProviderMetaInfo::new(name.clone()));
            for dir in provider.directory_list() {
                meta.add_size(dir, 0);
            }
            inner.write_json(&key, &meta).await?;
        }

        let names: Vec<&String> = inner.providers.keys().collect();
        inner.write_json(PROVIDERS_KEY, &names).await
    }

    /// Names of the configured providers, in sorted order.
    pub fn providers(&self) -> Vec<String> {
        self.inner.providers.keys().cloned().collect()
    }

    /// Provider names recorded in the store.
    pub async fn provider_names(&self) -> Result<Vec<String>> {
        Ok(self
            .inner
            .read_json(PROVIDERS_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Aggregate backup sizes for `provider`.
    pub async fn meta_info(&self, provider: &str) -> Result<Option<ProviderMetaInfo>> {
        self.inner.read_json(&meta_info_key(provider)).await
    }

    /// Last recorded backup of `path` by `provider`.
    pub async fn file_record(&self, provider: &str, path: &Path) -> Result<Option<FileRecord>> {
        self.inner.file_record(provider, path).await
    }

    /// Number of dispatch tasks still running.
    pub fn in_flight(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Spawn one backup task per provider scoped to the event's root.
    ///
    /// Returns the number of tasks spawned. Events without a root, and
    /// events arriving after shutdown, are ignored.
    pub async fn dispatch(&self, event: Event) -> usize {
        // Held while spawning so shutdown cannot close the channel under us.
        let results = self.inner.results.read().await;
        let Some(tx) = results.as_ref() else {
            debug!("Shutting down; ignoring event for {}", event.path.display());
            return 0;
        };

        let Some(root) = event.root.clone() else {
            debug!("No watch root for {}; nothing to back up", event.path.display());
            return 0;
        };

        let event = Arc::new(event);
        let mut spawned = 0;
        for provider in self.inner.providers.values() {
            if !provider.directory_list().contains(&root) {
                continue;
            }

            let inner = Arc::clone(&self.inner);
            let provider = Arc::clone(provider);
            let event = Arc::clone(&event);
            let tx = tx.clone();
            self.inner
                .tasks
                .spawn(async move { inner.backup_if_needed(provider, event, tx).await });
            spawned += 1;
        }

        debug!(
            "Dispatched {} to {spawned} providers",
            event.path.display()
        );
        spawned
    }

    /// Stop accepting events, wait for in-flight backups, close the result
    /// channel, then close the store.
    ///
    /// The result receiver must keep being drained until it yields `None`,
    /// otherwise tasks blocked on a full channel never finish.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(tx) = self.inner.results.write().await.take() else {
            return Ok(());
        };

        self.inner.tasks.close();
        info!(
            "Waiting for {} in-flight backups",
            self.inner.tasks.len()
        );
        self.inner.tasks.wait().await;
        drop(tx);

        self.inner.store.close().await?;
        info!("Backup manager shut down");
        Ok(())
    }
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager")
            .field("providers", &self.providers())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Subscriber for BackupManager {
    async fn handle_event(&self, event: Event) {
        self.dispatch(event).await;
    }
}

impl Inner {
    async fn backup_if_needed(
        &self,
        provider: Arc<dyn Provider>,
        event: Arc<Event>,
        results: mpsc::Sender<BackupResult>,
    ) {
        let name = provider.name();
        let claim = InFlight {
            provider: name.to_string(),
            path: event.path.clone(),
            checksum: event.checksum.clone(),
        };

        {
            let mut in_flight = self.bookkeeping.lock().await;
            if in_flight.contains(&claim) {
                debug!("[{name}] {} already in flight", event.path.display());
                return;
            }
            if !self.is_backup_needed(name, &event).await {
                debug!("[{name}] {} is up to date", event.path.display());
                return;
            }
            in_flight.insert(claim.clone());
        }

        let result = match provider.backup(&event).await {
            Ok(()) => {
                let mut in_flight = self.bookkeeping.lock().await;
                self.record_success(name, &event).await;
                in_flight.remove(&claim);
                info!("[{name}] Backed up {}", event.path.display());
                BackupResult::success(&event.path, name)
            }
            Err(e) => {
                self.bookkeeping.lock().await.remove(&claim);
                error!("[{name}] Backup of {} failed: {e}", event.path.display());
                BackupResult::failed(&event.path, name, e.to_string())
            }
        };

        if results.send(result).await.is_err() {
            debug!("Result receiver dropped");
        }
    }

    /// Whether `provider` lacks the event's content. Store errors count as
    /// needing a backup.
    async fn is_backup_needed(&self, provider: &str, event: &Event) -> bool {
        match self.file_record(provider, &event.path).await {
            Ok(Some(record)) => record.checksum_for(provider) != Some(event.checksum.as_str()),
            Ok(None) => true,
            Err(e) => {
                error!(
                    "Failed to read record for {provider}:{}: {e}",
                    event.path.display()
                );
                true
            }
        }
    }

    /// Persist the new checksum and grow the root's size total.
    /// Caller holds the bookkeeping lock.
    async fn record_success(&self, provider: &str, event: &Event) {
        let key = file_record_key(provider, &event.path);
        let mut record = match self.read_json::<FileRecord>(&key).await {
            Ok(record) => record.unwrap_or_else(|| FileRecord::new(&event.path)),
            Err(e) => {
                warn!("Replacing unreadable record {key}: {e}");
                FileRecord::new(&event.path)
            }
        };
        record.root = event.root.clone();
        record.size = event.size;
        record
            .checksums
            .insert(provider.to_string(), event.checksum.clone());
        if let Err(e) = self.write_json(&key, &record).await {
            error!("Failed to save record {key}: {e}");
        }

        let Some(root) = event.root() else {
            return;
        };
        let key = meta_info_key(provider);
        let mut meta = match self.read_json::<ProviderMetaInfo>(&key).await {
            Ok(meta) => meta.unwrap_or_else(|| ProviderMetaInfo::new(provider)),
            Err(e) => {
                error!("Failed to read meta info {key}: {e}");
                return;
            }
        };
        meta.add_size(root, event.size);
        if let Err(e) = self.write_json(&key, &meta).await {
            error!("Failed to save meta info {key}: {e}");
        }
    }

    async fn file_record(&self, provider: &str, path: &Path) -> Result<Option<FileRecord>> {
        self.read_json(&file_record_key(provider, path)).await
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.store.set(key, bytes).await?;
        Ok(())
    }
}
