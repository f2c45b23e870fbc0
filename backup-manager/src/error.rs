//! Error types for the backup manager.

use thiserror::Error;

/// Result type alias for backup manager operations.
pub type Result<T> = std::result::Result<T, BackupError>;

/// Errors that can occur in the backup manager.
#[derive(Error, Debug)]
pub enum BackupError {
    /// Metadata store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Provider error.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A provider config names a type with no implementation.
    #[error("unknown provider type: {0}")]
    UnknownProviderType(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a metadata store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// Persisted state could not be decoded.
    #[error("corrupt store data: {0}")]
    Corrupt(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a backup provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The backup did not complete.
    #[error("backup failed: {0}")]
    Failed(String),

    /// The provider is missing a required setting.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
