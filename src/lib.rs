//! srb-monitor - device-state reconciliation and command dispatch core
//!
//! One monitor instance watches a single smart recycle bin. It merges two
//! independent telemetry sources (a keyed push feed and the bin's MQTT topic)
//! into one canonical [`models::DeviceState`], keeps a bounded history for
//! charting, raises edge-triggered threshold alerts and dispatches actuator
//! commands with an automatic safety revert of the displayed intent.
//!
//! The display layer is an external collaborator: it consumes state snapshots
//! and the alert channel, and drives [`engine::BinMonitor::set_intent`].

pub mod alerts;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod history;
pub mod merger;
pub mod models;

use parking_lot::Mutex;
use std::sync::Arc;

/// Mutable cell shared between the merger, the connection event loop and the
/// revert timers. All of them run on one runtime and never hold the lock
/// across an await, so a plain mutex is the serializing boundary around the
/// canonical state.
pub type Shared<T> = Arc<Mutex<T>>;

pub(crate) fn shared<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

pub use alerts::{alert_channel, AlertReceiver, AlertSender, ThresholdWatch};
pub use config::MonitorConfig;
pub use connection::{ConnectionManager, LinkStatus};
pub use dispatch::{CommandPublisher, Dispatcher};
pub use engine::BinMonitor;
pub use error::MonitorError;
pub use history::{HistoryEntry, HistoryRing};
pub use merger::TelemetryMerger;
pub use models::{
    ActuatorCommand, ActuatorIntent, AlertEvent, AlertSeverity, CoverState, DeviceState,
    FeedEvent, IntendedState, LockState, PositionState,
};
