//! Configuration types for providers and the dispatcher.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::Result;

/// Default capacity of the backup result channel.
pub const DEFAULT_RESULT_CAPACITY: usize = 10;

/// The full set of configured backup destinations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    pub providers: Vec<ProviderConfig>,
}

impl BackupConfig {
    /// Load a config from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read(path.as_ref()).await?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Write the config as pretty JSON.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_vec_pretty(self)?;
        fs::write(path.as_ref(), content).await?;
        Ok(())
    }

    /// Add a provider.
    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.push(provider);
        self
    }
}

/// Descriptor for one backup destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Unique provider name.
    pub name: String,

    /// Implementation to build, e.g. `echo` or `local`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Provider-specific settings.
    #[serde(default)]
    pub settings: HashMap<String, String>,

    /// Roots this provider backs up.
    #[serde(default)]
    pub directory_list: Vec<PathBuf>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            settings: HashMap::new(),
            directory_list: Vec::new(),
        }
    }

    /// Add a directory to back up.
    pub fn with_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory_list.push(dir.into());
        self
    }

    /// Set a provider-specific setting.
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }
}

/// Tuning for the [`crate::BackupManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Bound on undelivered backup results before dispatch tasks block.
    pub result_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            result_capacity: DEFAULT_RESULT_CAPACITY,
        }
    }
}
