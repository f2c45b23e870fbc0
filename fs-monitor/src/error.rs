//! Error types for the file monitor.

use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors that can occur in the file monitor.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Directory not found, or not a directory.
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    /// `remove` was called for a path that has no active registration.
    #[error("path is not watched: {0}")]
    NotWatched(String),

    /// The watch loop is already running.
    #[error("monitor is already running")]
    AlreadyRunning,

    /// The OS watch handle has been released.
    #[error("monitor has been stopped")]
    Stopped,

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// Directory walk error.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
