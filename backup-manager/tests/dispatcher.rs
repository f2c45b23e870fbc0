//! Dispatcher behaviour: scoping, dedup, failure handling, isolation, shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keeper_backup_manager::{
    BackupManager, BackupResult, BackupStatus, DispatcherConfig, MemoryStore, MetadataStore,
    Provider, ProviderError, StoreError,
};
use keeper_fs_monitor::{Event, EventKind, Subscriber};
use pretty_assertions::assert_eq;
use tokio::sync::{Notify, mpsc};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(200);

const C1: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
const C2: &str = "c2e07d4a8c5f2a6e4f1b8f3b4c9d2e7a1b6f0c3d8e5a2b7c4d9e6f1a3b8c5d2e";

/// Provider whose outcome and latency are controlled by the test.
struct FakeProvider {
    name: String,
    directories: Vec<PathBuf>,
    calls: AtomicUsize,
    fail_with: std::sync::Mutex<Option<String>>,
    gate: Option<Arc<Notify>>,
    delay: Duration,
}

impl FakeProvider {
    fn new(name: &str, dir: &str) -> Self {
        Self {
            name: name.to_string(),
            directories: vec![PathBuf::from(dir)],
            calls: AtomicUsize::new(0),
            fail_with: std::sync::Mutex::new(None),
            gate: None,
            delay: Duration::ZERO,
        }
    }

    fn failing(self, message: &str) -> Self {
        self.set_failure(Some(message));
        self
    }

    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn set_failure(&self, message: Option<&str>) {
        *self.fail_with.lock().unwrap() = message.map(str::to_string);
    }

    fn recover(&self) {
        self.set_failure(None);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn directory_list(&self) -> &[PathBuf] {
        &self.directories
    }

    async fn backup(&self, _event: &Event) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failure = self.fail_with.lock().unwrap().clone();
        match failure {
            Some(message) => Err(ProviderError::Failed(message)),
            None => Ok(()),
        }
    }
}

/// Store whose reads always fail.
struct BrokenStore;

#[async_trait]
impl MetadataStore for BrokenStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::Corrupt("disk on fire".to_string()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>) -> Result<(), StoreError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn event(path: &str, checksum: &str, size: u64) -> Event {
    Event::new(EventKind::Changed, path, checksum, size).with_root("/data")
}

async fn manager(
    providers: Vec<Arc<dyn Provider>>,
) -> (BackupManager, mpsc::Receiver<BackupResult>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let (manager, results) =
        BackupManager::new(store.clone(), providers, DispatcherConfig::default())
            .await
            .unwrap();
    (manager, results, store)
}

async fn next_result(results: &mut mpsc::Receiver<BackupResult>) -> BackupResult {
    tokio::time::timeout(WAIT, results.recv())
        .await
        .expect("timed out waiting for result")
        .expect("result channel closed")
}

async fn assert_no_result(results: &mut mpsc::Receiver<BackupResult>) {
    if let Ok(Some(result)) = tokio::time::timeout(QUIET, results.recv()).await {
        panic!("unexpected result: {result:?}");
    }
}

#[tokio::test]
async fn test_bootstrap_registers_directories() {
    let p1 = Arc::new(FakeProvider::new("P1", "/data"));
    let p2 = Arc::new(FakeProvider::new("P2", "/other"));
    let (manager, _results, _store) = manager(vec![p1, p2]).await;

    assert_eq!(manager.provider_names().await.unwrap(), vec!["P1", "P2"]);
    let meta = manager.meta_info("P1").await.unwrap().unwrap();
    assert_eq!(meta.name, "P1");
    assert_eq!(meta.size_of(Path::new("/data")), Some(0));
    assert_eq!(meta.size_of(Path::new("/other")), None);
}

#[tokio::test]
async fn test_duplicate_provider_names_rejected() {
    let p1 = Arc::new(FakeProvider::new("P1", "/data"));
    let dup = Arc::new(FakeProvider::new("P1", "/other"));
    let result = BackupManager::new(
        Arc::new(MemoryStore::new()),
        vec![p1, dup],
        DispatcherConfig::default(),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_backup_lifecycle() {
    let p1 = Arc::new(FakeProvider::new("P1", "/data"));
    let p2 = Arc::new(FakeProvider::new("P2", "/other"));
    let (manager, mut results, _store) = manager(vec![p1.clone(), p2.clone()]).await;

    // New file: only the provider scoped to /data runs.
    manager.handle_event(event("/data/f.txt", C1, 3)).await;
    let result = next_result(&mut results).await;
    assert_eq!(result, BackupResult::success("/data/f.txt", "P1"));
    assert_no_result(&mut results).await;
    assert_eq!(p2.calls(), 0);

    let record = manager
        .file_record("P1", Path::new("/data/f.txt"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.checksum_for("P1"), Some(C1));
    assert_eq!(record.root.as_deref(), Some(Path::new("/data")));

    // Same content again: skipped silently.
    manager.handle_event(event("/data/f.txt", C1, 3)).await;
    assert_no_result(&mut results).await;
    assert_eq!(p1.calls(), 1);

    // New content: uploaded, record and size total updated.
    manager.handle_event(event("/data/f.txt", C2, 7)).await;
    let result = next_result(&mut results).await;
    assert_eq!(result.status, BackupStatus::Success);
    assert_eq!(p1.calls(), 2);

    let record = manager
        .file_record("P1", Path::new("/data/f.txt"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.checksum_for("P1"), Some(C2));
    assert_eq!(record.size, 7);

    let meta = manager.meta_info("P1").await.unwrap().unwrap();
    assert_eq!(meta.size_of(Path::new("/data")), Some(10));
}

#[tokio::test]
async fn test_failed_backup_is_retried() {
    let p1 = Arc::new(FakeProvider::new("P1", "/data").failing("bucket unavailable"));
    let (manager, mut results, _store) = manager(vec![p1.clone()]).await;

    manager.handle_event(event("/data/f.txt", C2, 7)).await;
    let result = next_result(&mut results).await;
    assert_eq!(result.status, BackupStatus::Failed);
    assert_eq!(
        result.error.as_deref(),
        Some("backup failed: bucket unavailable")
    );
    assert_eq!(
        manager
            .file_record("P1", Path::new("/data/f.txt"))
            .await
            .unwrap(),
        None
    );
    let meta = manager.meta_info("P1").await.unwrap().unwrap();
    assert_eq!(meta.size_of(Path::new("/data")), Some(0));

    // The same content is retried on the next event, not skipped.
    p1.recover();
    manager.handle_event(event("/data/f.txt", C2, 7)).await;
    let result = next_result(&mut results).await;
    assert!(result.is_success());
    assert_eq!(p1.calls(), 2);
}

#[tokio::test]
async fn test_failure_keeps_previous_checksum() {
    let p1 = Arc::new(FakeProvider::new("P1", "/data"));
    let (manager, mut results, _store) = manager(vec![p1.clone()]).await;

    manager.handle_event(event("/data/f.txt", C1, 3)).await;
    next_result(&mut results).await;

    p1.set_failure(Some("offline"));
    manager.handle_event(event("/data/f.txt", C2, 7)).await;
    let result = next_result(&mut results).await;
    assert_eq!(result.status, BackupStatus::Failed);

    let record = manager
        .file_record("P1", Path::new("/data/f.txt"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.checksum_for("P1"), Some(C1));
}

#[tokio::test]
async fn test_blocked_provider_does_not_delay_others() {
    let gate = Arc::new(Notify::new());
    let blocked = Arc::new(FakeProvider::new("A", "/data").gated(gate.clone()));
    let failing = Arc::new(FakeProvider::new("B", "/data").failing("nope"));
    let healthy = Arc::new(FakeProvider::new("C", "/data"));
    let (manager, mut results, _store) =
        manager(vec![blocked.clone(), failing, healthy]).await;

    assert_eq!(manager.dispatch(event("/data/f.txt", C1, 3)).await, 3);

    let mut early = vec![next_result(&mut results).await, next_result(&mut results).await];
    early.sort_by(|a, b| a.provider.cmp(&b.provider));
    assert_eq!(early[0].provider, "B");
    assert_eq!(early[0].status, BackupStatus::Failed);
    assert_eq!(early[1], BackupResult::success("/data/f.txt", "C"));
    assert!(manager.in_flight() >= 1);

    gate.notify_one();
    let late = next_result(&mut results).await;
    assert_eq!(late, BackupResult::success("/data/f.txt", "A"));
    assert_eq!(blocked.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_identical_events_upload_once() {
    let p1 = Arc::new(FakeProvider::new("P1", "/data").slow(Duration::from_millis(100)));
    let (manager, mut results, _store) = manager(vec![p1.clone()]).await;

    manager.dispatch(event("/data/f.txt", C1, 3)).await;
    manager.dispatch(event("/data/f.txt", C1, 3)).await;
    manager.dispatch(event("/data/f.txt", C1, 3)).await;

    next_result(&mut results).await;
    assert_no_result(&mut results).await;
    assert_eq!(p1.calls(), 1);
}

#[tokio::test]
async fn test_unrooted_event_is_not_dispatched() {
    let p1 = Arc::new(FakeProvider::new("P1", "/data"));
    let (manager, mut results, _store) = manager(vec![p1.clone()]).await;

    let unrooted = Event::new(EventKind::Added, "/data/f.txt", C1, 3);
    assert_eq!(manager.dispatch(unrooted).await, 0);

    // Scope matching is exact, not a string prefix.
    let sibling = Event::new(EventKind::Added, "/data2/f.txt", C1, 3).with_root("/data2");
    assert_eq!(manager.dispatch(sibling).await, 0);

    assert_no_result(&mut results).await;
    assert_eq!(p1.calls(), 0);
}

#[tokio::test]
async fn test_store_errors_fail_open() {
    let p1 = Arc::new(FakeProvider::new("P1", "/data"));
    let providers: Vec<Arc<dyn Provider>> = vec![p1.clone()];

    // Bootstrap itself cannot proceed without a readable store.
    let result = BackupManager::new(
        Arc::new(BrokenStore),
        providers.clone(),
        DispatcherConfig::default(),
    )
    .await;
    assert!(result.is_err());

    struct FlakyStore {
        inner: MemoryStore,
        broken: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl MetadataStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            if self.broken.load(Ordering::SeqCst) {
                return BrokenStore.get(key).await;
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
            self.inner.set(key, value).await
        }

        async fn close(&self) -> Result<(), StoreError> {
            self.inner.close().await
        }
    }

    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        broken: std::sync::atomic::AtomicBool::new(false),
    });
    let (manager, mut results) =
        BackupManager::new(store.clone(), providers, DispatcherConfig::default())
            .await
            .unwrap();

    manager.dispatch(event("/data/f.txt", C1, 3)).await;
    next_result(&mut results).await;

    store.broken.store(true, Ordering::SeqCst);
    manager.dispatch(event("/data/f.txt", C1, 3)).await;
    let result = next_result(&mut results).await;
    assert!(result.is_success());
    assert_eq!(p1.calls(), 2);
}

#[tokio::test]
async fn test_shutdown_drains_then_closes() {
    let p1 = Arc::new(FakeProvider::new("P1", "/data").slow(Duration::from_millis(100)));
    let (manager, mut results, store) = manager(vec![p1.clone()]).await;

    manager.dispatch(event("/data/a.txt", C1, 3)).await;
    manager.dispatch(event("/data/b.txt", C1, 3)).await;

    let consumer = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(result) = results.recv().await {
            seen.push(result);
        }
        seen
    });

    manager.shutdown().await.unwrap();
    let seen = tokio::time::timeout(WAIT, consumer).await.unwrap().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(BackupResult::is_success));

    // Nothing is accepted after shutdown, and the store is closed.
    assert_eq!(manager.dispatch(event("/data/c.txt", C1, 3)).await, 0);
    assert!(matches!(store.get("meta:P1").await, Err(StoreError::Closed)));
    manager.shutdown().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_non_utf8_path_is_deduplicated() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let path = Path::new(OsStr::from_bytes(b"/data/caf\xe9.txt"));
    let p1 = Arc::new(FakeProvider::new("P1", "/data"));
    let (manager, mut results, _store) = manager(vec![p1.clone()]).await;
    let changed = || Event::new(EventKind::Changed, path, C1, 6).with_root("/data");

    manager.handle_event(changed()).await;
    assert!(next_result(&mut results).await.is_success());

    manager.handle_event(changed()).await;
    assert_no_result(&mut results).await;
    assert_eq!(p1.calls(), 1);

    let record = manager.file_record("P1", path).await.unwrap().unwrap();
    assert_eq!(record.path, path);
    assert_eq!(record.checksum_for("P1"), Some(C1));
    let meta = manager.meta_info("P1").await.unwrap().unwrap();
    assert_eq!(meta.size_of(Path::new("/data")), Some(6));
}
