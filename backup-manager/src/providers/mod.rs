//! Backup providers.
//!
//! A provider is one backup destination. The dispatcher only needs its name,
//! the roots it is responsible for, and a way to back up a single event.

mod echo;
mod local;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use keeper_fs_monitor::Event;

use crate::config::ProviderConfig;
use crate::error::{BackupError, ProviderError, Result};

pub use echo::EchoProvider;
pub use local::LocalDirProvider;

/// Trait for backup destinations.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique name of this provider.
    fn name(&self) -> &str;

    /// Watch roots this provider backs up.
    fn directory_list(&self) -> &[PathBuf];

    /// Back up the file described by `event`.
    ///
    /// The dispatcher never retries a failed call; the next detected change
    /// of the file triggers another attempt.
    async fn backup(&self, event: &Event) -> std::result::Result<(), ProviderError>;
}

/// Build a provider from its config. Matching on `type` ignores case.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config.kind.to_ascii_lowercase().as_str() {
        "echo" => Ok(Arc::new(EchoProvider::from_config(config))),
        "local" => Ok(Arc::new(LocalDirProvider::from_config(config)?)),
        _ => Err(BackupError::UnknownProviderType(config.kind.clone())),
    }
}
