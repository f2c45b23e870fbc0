//! Outcome of a dispatched backup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Whether a dispatched backup succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupStatus {
    Success,
    Failed,
}

/// One result per (event, provider) pair that was actually dispatched.
///
/// Skipped (already backed up) work produces no result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupResult {
    /// File that was backed up.
    pub path: PathBuf,

    /// Provider that handled it.
    pub provider: String,

    pub status: BackupStatus,

    /// Error message when `status` is `Failed`.
    pub error: Option<String>,
}

impl BackupResult {
    pub fn success(path: impl Into<PathBuf>, provider: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            provider: provider.into(),
            status: BackupStatus::Success,
            error: None,
        }
    }

    pub fn failed(
        path: impl Into<PathBuf>,
        provider: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            provider: provider.into(),
            status: BackupStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == BackupStatus::Success
    }
}
