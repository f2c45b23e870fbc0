//! # File Monitor
//!
//! Watches directory trees and turns raw file system noise into semantic
//! change events for downstream consumers such as the backup dispatcher.
//!
//! ## Features
//!
//! - **Reference-counted Watches**: Overlapping `add` calls share one watch
//! - **Initial Scan**: A freshly watched tree reports every file as added
//! - **Debounced Coalescing**: Bursts collapse into one event per path
//! - **Content Probing**: Events carry the SHA-256 and size at flush time
//! - **Root Attribution**: Each event names the watch root it belongs to
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        File Monitor                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  notify ──► RawNotification ──► Coalescer ──► Event             │
//! │                                     │           │               │
//! │                                     ▼           ▼               │
//! │                                   probe    Subscribers          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod coalesce;
pub mod config;
pub mod error;
pub mod event;
pub mod monitor;
pub mod probe;
pub mod subscriber;

pub use coalesce::Coalescer;
pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use event::{Event, EventKind, RawNotification, RawOp};
pub use monitor::FileMonitor;
pub use probe::{Probe, probe};
pub use subscriber::{Subscriber, SubscriptionId};
