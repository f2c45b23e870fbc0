use std::path::PathBuf;

use async_trait::async_trait;
use keeper_fs_monitor::Event;
use tracing::info;

use super::Provider;
use crate::config::ProviderConfig;
use crate::error::ProviderError;

/// Provider that only logs what it would back up.
#[derive(Debug, Clone)]
pub struct EchoProvider {
    name: String,
    directories: Vec<PathBuf>,
}

impl EchoProvider {
    pub fn new(name: impl Into<String>, directories: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directories,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(config.name.clone(), config.directory_list.clone())
    }
}

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn directory_list(&self) -> &[PathBuf] {
        &self.directories
    }

    async fn backup(&self, event: &Event) -> Result<(), ProviderError> {
        info!(
            "[{}] Backing up {} ({}, {} bytes)",
            self.name,
            event.path.display(),
            event.kind,
            event.size
        );
        Ok(())
    }
}
