//! File monitor: watch registration, the flush loop, and event fan-out.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::coalesce::Coalescer;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::event::{RawNotification, RawOp};
use crate::subscriber::{Subscriber, SubscriberSet, SubscriptionId};

/// Input to the watch loop.
enum Signal {
    Raw(RawNotification),
    Error(notify::Error),
}

/// Watch roots with their reference counts, plus the OS watch handle.
struct Registry {
    /// Every entry has a count of at least one.
    roots: BTreeMap<PathBuf, usize>,

    /// `None` once the monitor has been stopped.
    watcher: Option<RecommendedWatcher>,
}

impl Registry {
    /// Drop the OS watch on `path`, then restore every remaining root that
    /// overlaps it.
    ///
    /// Nested roots share watch descriptors for their common subtree, so
    /// unwatching one tears down part of the other.
    fn unwatch(&mut self, path: &Path) {
        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };
        if let Err(e) = watcher.unwatch(path) {
            warn!("Failed to unwatch {}: {e}", path.display());
        }

        for root in self.roots.keys() {
            if root.starts_with(path) || path.starts_with(root) {
                debug!("Restoring watch on {}", root.display());
                if let Err(e) = watcher.watch(root, RecursiveMode::Recursive) {
                    warn!("Failed to restore watch on {}: {e}", root.display());
                }
            }
        }
    }
}

struct Inner {
    config: MonitorConfig,
    registry: Mutex<Registry>,
    signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: Mutex<Option<mpsc::UnboundedReceiver<Signal>>>,
    subscribers: SubscriberSet,
}

/// Watches directory trees and publishes coalesced change events.
///
/// Cloning yields another handle to the same monitor. `add` and `remove`
/// are expected to be called from a single control path.
#[derive(Clone)]
pub struct FileMonitor {
    inner: Arc<Inner>,
}

impl FileMonitor {
    /// Create a monitor and its OS watch handle.
    pub fn new(config: MonitorConfig) -> Result<Self> {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let tx = signal_tx.clone();
        let watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let Some(op) = RawOp::from_notify(&event.kind) else {
                        return;
                    };
                    for path in event.paths {
                        if tx.send(Signal::Raw(RawNotification::new(path, op))).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Signal::Error(e));
                }
            },
        )?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry: Mutex::new(Registry {
                    roots: BTreeMap::new(),
                    watcher: Some(watcher),
                }),
                signal_tx,
                signal_rx: Mutex::new(Some(signal_rx)),
                subscribers: SubscriberSet::default(),
            }),
        })
    }

    /// Register a directory tree for watching.
    ///
    /// The first registration watches the tree, walks it, and queues an
    /// `added` notification for every regular file found. Later registrations
    /// of the same path only bump its reference count.
    pub async fn add(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let mut registry = self.inner.registry.lock().await;

        if let Some(count) = registry.roots.get_mut(&path) {
            *count += 1;
            debug!("Watch count for {} is now {count}", path.display());
            return Ok(());
        }

        if !path.is_dir() {
            return Err(MonitorError::DirectoryNotFound(path.display().to_string()));
        }

        let watcher = registry.watcher.as_mut().ok_or(MonitorError::Stopped)?;
        watcher.watch(&path, RecursiveMode::Recursive)?;

        // Walked after the watch is in place so nothing created in between is missed.
        let files = match scan_files(&path) {
            Ok(files) => files,
            Err(e) => {
                registry.unwatch(&path);
                return Err(e);
            }
        };

        registry.roots.insert(path.clone(), 1);
        drop(registry);

        info!(
            "Watching {} ({} existing files)",
            path.display(),
            files.len()
        );
        for file in files {
            let notification = RawNotification::new(file, RawOp::Create);
            if self.inner.signal_tx.send(Signal::Raw(notification)).is_err() {
                warn!("Watch loop has exited; dropping initial scan of {}", path.display());
                break;
            }
        }

        Ok(())
    }

    /// Drop one registration of `path`, unwatching it when none remain.
    pub async fn remove(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut registry = self.inner.registry.lock().await;

        let Some(count) = registry.roots.get_mut(path) else {
            return Err(MonitorError::NotWatched(path.display().to_string()));
        };
        *count -= 1;
        if *count > 0 {
            debug!("Watch count for {} is now {count}", path.display());
            return Ok(());
        }

        registry.roots.remove(path);
        registry.unwatch(path);

        info!("Stopped watching {}", path.display());
        Ok(())
    }

    /// Whether `path` has an active registration.
    pub async fn is_watched(&self, path: impl AsRef<Path>) -> bool {
        self.inner
            .registry
            .lock()
            .await
            .roots
            .contains_key(path.as_ref())
    }

    /// Every registered root, in sorted order.
    pub async fn root_dirs(&self) -> Vec<PathBuf> {
        self.inner.registry.lock().await.roots.keys().cloned().collect()
    }

    /// Register a listener for coalesced events.
    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        self.inner.subscribers.insert(subscriber).await
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.remove(id).await
    }

    /// Number of registered listeners.
    pub async fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len().await
    }

    /// Run the watch loop until `cancel` fires, then stop the monitor.
    ///
    /// Watch errors are logged and never end the loop. Each flush, including
    /// probing and delivery to every subscriber, completes before the next
    /// notification is read.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let mut signals = self
            .inner
            .signal_rx
            .lock()
            .await
            .take()
            .ok_or(MonitorError::AlreadyRunning)?;

        let flush_delay = self.inner.config.flush_delay;
        let mut coalescer = Coalescer::new(flush_delay);
        let mut safety_tick = tokio::time::interval(flush_delay);
        safety_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("File monitor started (flush delay {flush_delay:?})");
        loop {
            let deadline = coalescer.deadline();
            tokio::select! {
                _ = cancel.cancelled() => break,
                signal = signals.recv() => match signal {
                    Some(Signal::Raw(notification)) => coalescer.observe(notification),
                    Some(Signal::Error(e)) => warn!("Watch error: {e}"),
                    None => break,
                },
                _ = sleep_until(deadline) => self.flush(&mut coalescer).await,
                _ = safety_tick.tick() => {
                    if !coalescer.is_empty() {
                        self.flush(&mut coalescer).await;
                    }
                }
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Release the OS watch handle. Safe to call more than once.
    pub async fn stop(&self) {
        let watcher = self.inner.registry.lock().await.watcher.take();
        if watcher.is_some() {
            info!("File monitor stopped");
        }
    }

    async fn flush(&self, coalescer: &mut Coalescer) {
        let events = coalescer.flush().await;
        if events.is_empty() {
            return;
        }

        let roots = self.root_dirs().await;
        for mut event in events {
            event.root = resolve_root(&roots, &event.path);
            debug!(
                "Emitting {} for {} (root {:?})",
                event.kind,
                event.path.display(),
                event.root
            );
            self.inner.subscribers.publish(&event).await;
        }
    }
}

impl std::fmt::Debug for FileMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMonitor")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Pick the root a file belongs to: the longest registered root that
/// contains it, compared by whole path components.
pub fn resolve_root(roots: &[PathBuf], path: &Path) -> Option<PathBuf> {
    roots
        .iter()
        .filter(|root| path.starts_with(root))
        .max_by_key(|root| root.components().count())
        .cloned()
}

/// Every regular file under `root`.
fn scan_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
