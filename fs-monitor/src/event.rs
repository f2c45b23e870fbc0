//! Raw notifications and the coalesced change events built from them.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A coalesced file change, emitted at most once per path per flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Registered watch root the file belongs to, if any.
    pub root: Option<PathBuf>,

    /// Path to the affected file.
    pub path: PathBuf,

    /// What happened to the file.
    pub kind: EventKind,

    /// When the event was produced.
    pub timestamp: DateTime<Utc>,

    /// Hex-encoded SHA-256 of the file content at flush time.
    pub checksum: String,

    /// File size in bytes at flush time.
    pub size: u64,
}

impl Event {
    /// Create an unattributed event stamped with the current time.
    pub fn new(
        kind: EventKind,
        path: impl Into<PathBuf>,
        checksum: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            root: None,
            path: path.into(),
            kind,
            timestamp: Utc::now(),
            checksum: checksum.into(),
            size,
        }
    }

    /// Attribute the event to a watch root.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// The root as a path, if attributed.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }
}

/// Kind of coalesced event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The file is new.
    Added,

    /// The file content was modified.
    Changed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => f.write_str("added"),
            Self::Changed => f.write_str("changed"),
        }
    }
}

/// Operation reported by the OS for a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawOp {
    Create,
    Write,
    Remove,
    Rename,
}

impl RawOp {
    /// Map a notify event kind onto the operations the coalescer cares about.
    ///
    /// Access and metadata-only changes carry no content change and map to `None`.
    pub fn from_notify(kind: &notify::EventKind) -> Option<Self> {
        use notify::event::ModifyKind;

        match kind {
            notify::EventKind::Create(_) => Some(Self::Create),
            notify::EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Rename),
            notify::EventKind::Modify(ModifyKind::Metadata(_)) => None,
            notify::EventKind::Modify(_) => Some(Self::Write),
            notify::EventKind::Remove(_) => Some(Self::Remove),
            notify::EventKind::Access(_) | notify::EventKind::Any | notify::EventKind::Other => {
                None
            }
        }
    }
}

/// A single (path, operation) pair waiting in the coalescer buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub path: PathBuf,
    pub op: RawOp,
}

impl RawNotification {
    pub fn new(path: impl Into<PathBuf>, op: RawOp) -> Self {
        Self {
            path: path.into(),
            op,
        }
    }
}
