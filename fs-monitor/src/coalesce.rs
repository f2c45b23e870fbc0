//! Per-path buffering and reduction of raw notifications.
//!
//! Every notification lands in a per-path queue and pushes the single flush
//! deadline out by the configured delay. On flush each queue is reduced to at
//! most one [`Event`], probed against the file's content at that moment, and
//! cleared.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::event::{Event, EventKind, RawNotification, RawOp};
use crate::probe::probe;

/// Buffers raw notifications and reduces them into semantic events.
#[derive(Debug)]
pub struct Coalescer {
    /// Queued operations per path, in arrival order.
    buffer: BTreeMap<PathBuf, Vec<RawOp>>,

    /// Debounce delay applied on every arrival.
    flush_delay: Duration,

    /// The one pending flush deadline, if anything is buffered.
    deadline: Option<Instant>,
}

impl Coalescer {
    /// Create an empty coalescer.
    pub fn new(flush_delay: Duration) -> Self {
        Self {
            buffer: BTreeMap::new(),
            flush_delay,
            deadline: None,
        }
    }

    /// Buffer a notification and reset the flush deadline.
    pub fn observe(&mut self, notification: RawNotification) {
        debug!(
            "Buffered {:?} for {}",
            notification.op,
            notification.path.display()
        );
        self.buffer
            .entry(notification.path)
            .or_default()
            .push(notification.op);
        self.deadline = Some(Instant::now() + self.flush_delay);
    }

    /// When the pending flush is due, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of paths with buffered notifications.
    pub fn pending_paths(&self) -> usize {
        self.buffer.len()
    }

    /// Reduce every buffered path to at most one event and clear the buffer.
    ///
    /// Paths whose history is ambiguous, or whose file can no longer be probed,
    /// produce nothing.
    pub async fn flush(&mut self) -> Vec<Event> {
        self.deadline = None;
        let buffer = std::mem::take(&mut self.buffer);

        let mut events = Vec::new();
        for (path, ops) in buffer {
            let Some(kind) = reduce(&ops) else {
                debug!("Suppressed {ops:?} for {}", path.display());
                continue;
            };

            match probe(&path).await {
                Ok(probe) => events.push(Event::new(kind, path, probe.checksum, probe.size)),
                Err(e) => debug!("Skipping {}: {e}", path.display()),
            }
        }

        events
    }
}

/// Resolve a path's operation history to a single event kind.
///
/// A create wins unless the file was also removed or renamed. A write counts
/// only when there was no create and no rename. Everything else is ambiguous.
pub fn reduce(ops: &[RawOp]) -> Option<EventKind> {
    let has = |op: RawOp| ops.contains(&op);
    let (created, written, removed, renamed) = (
        has(RawOp::Create),
        has(RawOp::Write),
        has(RawOp::Remove),
        has(RawOp::Rename),
    );

    if created && !removed && !renamed {
        Some(EventKind::Added)
    } else if written && !created && !renamed {
        Some(EventKind::Changed)
    } else {
        None
    }
}
