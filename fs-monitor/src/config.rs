//! Configuration for the file monitor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default debounce delay before buffered notifications are flushed.
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_secs(3);

/// Configuration for a [`crate::FileMonitor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Quiet period after the last notification before the buffer is flushed.
    ///
    /// The same period drives the periodic safety flush.
    #[serde(rename = "flush_delay_ms", with = "duration_ms")]
    pub flush_delay: Duration,
}

impl MonitorConfig {
    /// Create a config with the given flush delay.
    pub fn new(flush_delay: Duration) -> Self {
        Self { flush_delay }
    }

    /// Set the flush delay.
    pub fn with_flush_delay(mut self, flush_delay: Duration) -> Self {
        self.flush_delay = flush_delay;
        self
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_DELAY)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
