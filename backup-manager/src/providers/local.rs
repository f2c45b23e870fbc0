use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use keeper_fs_monitor::Event;
use tokio::fs;
use tracing::debug;

use super::Provider;
use crate::config::ProviderConfig;
use crate::error::ProviderError;

/// Setting naming the directory backups are copied into.
pub const DESTINATION_SETTING: &str = "destination";

/// Provider that copies files into a local directory.
///
/// Files keep their path relative to the event root, so `/data/a/f.txt`
/// under root `/data` lands at `<destination>/a/f.txt`.
#[derive(Debug, Clone)]
pub struct LocalDirProvider {
    name: String,
    directories: Vec<PathBuf>,
    destination: PathBuf,
}

impl LocalDirProvider {
    pub fn new(
        name: impl Into<String>,
        directories: Vec<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            directories,
            destination: destination.into(),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let destination = config.settings.get(DESTINATION_SETTING).ok_or_else(|| {
            ProviderError::Config(format!(
                "provider {} is missing the \"{DESTINATION_SETTING}\" setting",
                config.name
            ))
        })?;

        Ok(Self::new(
            config.name.clone(),
            config.directory_list.clone(),
            destination,
        ))
    }

    /// Where `event`'s file is copied to.
    pub fn target_path(&self, event: &Event) -> PathBuf {
        let relative = match event
            .root()
            .and_then(|root| event.path.strip_prefix(root).ok())
        {
            Some(relative) => relative.to_path_buf(),
            None => normal_components(&event.path),
        };
        self.destination.join(relative)
    }
}

/// Keep only the named components so the path can be joined under the
/// destination.
fn normal_components(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

#[async_trait]
impl Provider for LocalDirProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn directory_list(&self) -> &[PathBuf] {
        &self.directories
    }

    async fn backup(&self, event: &Event) -> Result<(), ProviderError> {
        let target = self.target_path(event);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let copied = fs::copy(&event.path, &target).await?;
        debug!(
            "[{}] Copied {} to {} ({copied} bytes)",
            self.name,
            event.path.display(),
            target.display()
        );
        Ok(())
    }
}
