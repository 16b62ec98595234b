//! Canonical state, wire message shapes and display-layer events.
//!
//! Wire field names (`binCapacity`, `upDn`, `weightInGrams`) follow the
//! device firmware; the crate-side names follow Rust conventions.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Cover actuator position. The firmware publishes `close`; `closed` is
/// accepted as an alias for hand-written payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverState {
    Open,
    #[serde(rename = "close", alias = "closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    #[serde(rename = "lock", alias = "locked")]
    Locked,
    #[serde(rename = "unlock", alias = "unlocked")]
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionState {
    Up,
    Down,
}

/// The canonical, merged condition of one bin. A single shared cell holds at
/// most one of these; every accepted telemetry event replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    pub bin_id: String,
    /// Percent full, always within [0,100] (out-of-range readings are coerced).
    pub fill_level: f64,
    pub cover: CoverState,
    pub lock: LockState,
    pub position: PositionState,
    /// Present only after a thrown-item event or a payload that carried it;
    /// persists until the next accepted event overwrites it.
    pub weight_grams: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Telemetry payload as published on the bin's MQTT topic. Deserialization is
/// the validation gate: a payload missing any required field, or typing one
/// wrongly, fails as a whole and never touches [`DeviceState`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryMessage {
    pub bin_capacity: f64,
    pub cover: CoverState,
    pub lock: LockState,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    pub uid: String,
    pub up_dn: PositionState,
    pub weight_in_grams: Option<WeightField>,
}

/// Record shape of the keyed push feed. Identical to [`TelemetryMessage`]
/// except the feed historically stored timestamps as RFC 3339 strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRecord {
    pub bin_capacity: f64,
    pub cover: CoverState,
    pub lock: LockState,
    pub timestamp: FeedTimestamp,
    pub uid: String,
    pub up_dn: PositionState,
    pub weight_in_grams: Option<WeightField>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FeedTimestamp {
    Millis(i64),
    Text(String),
}

impl FeedTimestamp {
    pub fn resolve(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            Self::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

/// Weight as the firmware publishes it: newer revisions send a JSON number,
/// older ones a decimal string. Either shape deserializes; a string that is
/// not numeric resolves to no weight rather than rejecting the payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WeightField {
    Grams(f64),
    Text(String),
}

impl WeightField {
    pub fn grams(&self) -> Option<f64> {
        match self {
            Self::Grams(g) => Some(*g),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Events delivered by the push feed listener. Payloads arrive untyped; the
/// merger owns validation so a malformed record is rejected in one place.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Full snapshot of the bin's status records, in the feed's key order
    /// (insertion order). Only the most recently inserted record is used.
    Snapshot(Vec<serde_json::Value>),
    /// A thrown-item event `{material, weightInGrams}` from the shared drop
    /// feed; applies only when the material matches the monitored bin type.
    ThrownItem(serde_json::Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// Transient notification consumed by the display layer; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub message: String,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity,
            timestamp: Utc::now(),
        }
    }
}

/// Outbound actuator command words, published as `{"command": "..."}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorCommand {
    Open,
    Close,
    Up,
    Down,
    Lock,
    Unlock,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommandMessage {
    pub command: ActuatorCommand,
}

/// One user-intent change on a single actuator field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorIntent {
    Cover(CoverState),
    Position(PositionState),
    Lock(LockState),
}

impl ActuatorIntent {
    pub fn command(self) -> ActuatorCommand {
        match self {
            Self::Cover(CoverState::Open) => ActuatorCommand::Open,
            Self::Cover(CoverState::Closed) => ActuatorCommand::Close,
            Self::Position(PositionState::Up) => ActuatorCommand::Up,
            Self::Position(PositionState::Down) => ActuatorCommand::Down,
            Self::Lock(LockState::Locked) => ActuatorCommand::Lock,
            Self::Lock(LockState::Unlocked) => ActuatorCommand::Unlock,
        }
    }
}

/// Displayed user intent. Distinct from confirmed telemetry: the device may
/// never acknowledge, and the safety revert changes only this struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntendedState {
    pub cover: CoverState,
    pub position: PositionState,
    pub lock: LockState,
}

impl IntendedState {
    pub fn apply(&mut self, intent: ActuatorIntent) {
        match intent {
            ActuatorIntent::Cover(v) => self.cover = v,
            ActuatorIntent::Position(v) => self.position = v,
            ActuatorIntent::Lock(v) => self.lock = v,
        }
    }
}

impl Default for IntendedState {
    /// Safe defaults the intent reverts to after the inactivity window.
    fn default() -> Self {
        Self {
            cover: CoverState::Closed,
            position: PositionState::Down,
            lock: LockState::Locked,
        }
    }
}
