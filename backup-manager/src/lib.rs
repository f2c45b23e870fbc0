//! # Backup Manager
//!
//! Consumes change events from the file monitor and backs each changed file
//! up to every provider responsible for its root, skipping content a
//! provider already holds.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Backup Manager                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Event ──► scope match ──► dedup check ──► Provider::backup     │
//! │                                │                  │             │
//! │                                ▼                  ▼             │
//! │                         MetadataStore       BackupResult        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keeper_backup_manager::{BackupManager, DispatcherConfig, MemoryStore, build_provider};
//!
//! let providers = config.providers.iter().map(build_provider).collect::<Result<Vec<_>>>()?;
//! let (manager, mut results) =
//!     BackupManager::new(Arc::new(MemoryStore::new()), providers, DispatcherConfig::default()).await?;
//! monitor.subscribe(Arc::new(manager.clone())).await;
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod providers;
pub mod record;
pub mod result;
pub mod store;

pub use config::{BackupConfig, DispatcherConfig, ProviderConfig};
pub use error::{BackupError, ProviderError, Result, StoreError};
pub use manager::BackupManager;
pub use providers::{EchoProvider, LocalDirProvider, Provider, build_provider};
pub use record::{FileRecord, ProviderMetaInfo};
pub use result::{BackupResult, BackupStatus};
pub use store::{JsonFileStore, MemoryStore, MetadataStore};
