//! Telemetry merger - two uncoordinated sources, one canonical state.
//!
//! Source A is the keyed push feed (snapshot lists, last-inserted record
//! wins). Source B is the bin's MQTT topic (individual JSON messages, shared
//! with outbound commands). Neither source carries sequence numbers, so the
//! ordering policy is last-accepted-write-wins; an accepted event whose
//! timestamp is older than the held state is dropped, not merged.

use chrono::{TimeZone, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::alerts::{AlertSender, ThresholdWatch};
use crate::config::{MonitorConfig, ThresholdConf};
use crate::error::MonitorError;
use crate::history::{HistoryEntry, HistoryRing};
use crate::models::{
    AlertEvent, AlertSeverity, DeviceState, FeedEvent, FeedRecord, TelemetryMessage, WeightField,
};
use crate::{shared, Shared};

/// Everything an accepted event mutates, behind one lock: replacing the
/// canonical cell, appending history and running the alert latches happen
/// atomically with respect to the other source.
#[derive(Debug)]
struct MergeInner {
    device: Option<DeviceState>,
    history: HistoryRing<HistoryEntry>,
    watch: ThresholdWatch,
}

pub struct TelemetryMerger {
    bin_type: String,
    inner: Shared<MergeInner>,
    alerts: AlertSender,
}

impl TelemetryMerger {
    pub fn new(bin_type: &str, cfg: &MonitorConfig, alerts: AlertSender) -> Self {
        Self::with_thresholds(bin_type, cfg.history_capacity, &cfg.thresholds, alerts)
    }

    pub fn with_thresholds(
        bin_type: &str,
        history_capacity: usize,
        thresholds: &ThresholdConf,
        alerts: AlertSender,
    ) -> Self {
        Self {
            bin_type: bin_type.to_lowercase(),
            inner: shared(MergeInner {
                device: None,
                history: HistoryRing::new(history_capacity),
                watch: ThresholdWatch::new(thresholds),
            }),
            alerts,
        }
    }

    /// Current canonical state, if any telemetry has been accepted yet.
    pub fn state(&self) -> Option<DeviceState> {
        self.inner.lock().device.clone()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.lock().history.snapshot()
    }

    /// Source B entry point: one raw MQTT payload from the bin's topic.
    ///
    /// Unparseable payloads are dropped at debug level. Command-shaped
    /// payloads are our own dispatched commands echoing back on the shared
    /// topic and never count as telemetry. Everything else must deserialize
    /// with every required field correctly typed or it is rejected whole.
    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        let value: Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(e) => {
                debug!(topic, "dropping unparseable payload: {e}");
                return;
            }
        };

        if value.get("command").is_some() {
            debug!(topic, "command echo, ignored for state");
            return;
        }

        match telemetry_to_state(value) {
            Ok(state) => self.apply(state),
            Err(err) => debug!(topic, %err, "telemetry rejected"),
        }
    }

    /// Source A entry point: one event from the push feed listener.
    pub fn on_feed_event(&self, event: FeedEvent) {
        match event {
            FeedEvent::Snapshot(records) => {
                // The feed delivers every prior record under the bin's key;
                // only the most recently inserted one is current. Insertion
                // order is the feed's key order, not event time - a known
                // availability-over-ordering trade-off.
                let Some(raw) = records.into_iter().last() else {
                    debug!("empty feed snapshot");
                    return;
                };
                match feed_record_to_state(raw) {
                    Ok(state) => self.apply(state),
                    Err(err) => debug!(%err, "feed record rejected"),
                }
            }
            FeedEvent::ThrownItem(raw) => self.on_thrown_item(&raw),
        }
    }

    /// A thrown-item event updates the canonical weight (fill level is left
    /// alone; the device reports it separately) and raises a success alert.
    fn on_thrown_item(&self, raw: &Value) {
        let material = raw.get("material").and_then(Value::as_str);
        let weight = raw
            .get("weightInGrams")
            .and_then(|v| serde_json::from_value::<WeightField>(v.clone()).ok())
            .and_then(|w| w.grams());
        let (Some(material), Some(weight)) = (material, weight) else {
            warn!("thrown event missing 'material' or 'weightInGrams'");
            return;
        };
        if !material.eq_ignore_ascii_case(&self.bin_type) {
            return;
        }

        let fired = {
            let mut inner = self.inner.lock();
            match inner.device.as_mut() {
                Some(state) => {
                    state.weight_grams = Some(weight);
                    state.timestamp = Utc::now();
                    let snapshot = state.clone();
                    inner.history.append(HistoryEntry::from(&snapshot));
                    inner.watch.evaluate(&snapshot)
                }
                // No baseline state yet; the drop is still worth announcing.
                None => Vec::new(),
            }
        };
        for alert in fired {
            let _ = self.alerts.send(alert);
        }
        let _ = self.alerts.send(AlertEvent::new(
            AlertSeverity::Success,
            format!("Added {weight}g to the {material} bin."),
        ));
    }

    /// Commits one validated state. Out-of-order updates (older than the held
    /// timestamp) are dropped; otherwise the incoming state replaces the cell
    /// wholesale and the derived structures update under the same lock.
    fn apply(&self, incoming: DeviceState) {
        let fired = {
            let mut inner = self.inner.lock();
            if let Some(held) = &inner.device {
                if incoming.timestamp < held.timestamp {
                    debug!(
                        held = %held.timestamp,
                        incoming = %incoming.timestamp,
                        "out-of-order update dropped"
                    );
                    return;
                }
            }
            inner.history.append(HistoryEntry::from(&incoming));
            let fired = inner.watch.evaluate(&incoming);
            inner.device = Some(incoming);
            fired
        };
        for alert in fired {
            let _ = self.alerts.send(alert);
        }
    }
}

fn telemetry_to_state(value: Value) -> Result<DeviceState, MonitorError> {
    let msg: TelemetryMessage =
        serde_json::from_value(value).map_err(|e| MonitorError::Validation(e.to_string()))?;
    let timestamp = Utc
        .timestamp_millis_opt(msg.timestamp)
        .single()
        .ok_or_else(|| MonitorError::Validation(format!("timestamp {} unrepresentable", msg.timestamp)))?;
    Ok(DeviceState {
        bin_id: msg.uid,
        fill_level: clamp_fill_level(msg.bin_capacity),
        cover: msg.cover,
        lock: msg.lock,
        position: msg.up_dn,
        weight_grams: msg.weight_in_grams.as_ref().and_then(WeightField::grams),
        timestamp,
    })
}

fn feed_record_to_state(value: Value) -> Result<DeviceState, MonitorError> {
    let record: FeedRecord =
        serde_json::from_value(value).map_err(|e| MonitorError::Validation(e.to_string()))?;
    let timestamp = record
        .timestamp
        .resolve()
        .ok_or_else(|| MonitorError::Validation("unreadable feed timestamp".into()))?;
    Ok(DeviceState {
        bin_id: record.uid,
        fill_level: clamp_fill_level(record.bin_capacity),
        cover: record.cover,
        lock: record.lock,
        position: record.up_dn,
        weight_grams: record.weight_in_grams.as_ref().and_then(WeightField::grams),
        timestamp,
    })
}

/// Range guard: a capacity outside [0,100] is a sensor fault and maps to the
/// safe default 0 rather than propagating garbage into charts and alerts.
fn clamp_fill_level(raw: f64) -> f64 {
    if (0.0..=100.0).contains(&raw) {
        raw
    } else {
        let err = MonitorError::Range {
            metric: "binCapacity",
            value: raw,
        };
        debug!(%err, "coerced to 0");
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{alert_channel, AlertReceiver};
    use crate::models::{CoverState, LockState, PositionState};
    use serde_json::json;

    const TOPIC: &str = "srb/plastic/session";

    fn merger() -> (TelemetryMerger, AlertReceiver) {
        let (tx, rx) = alert_channel();
        let thresholds = ThresholdConf {
            fill_level: 90.0,
            weight_grams: None,
        };
        (
            TelemetryMerger::with_thresholds("plastic", 100, &thresholds, tx),
            rx,
        )
    }

    fn telemetry(fill: f64, ts: i64) -> Value {
        json!({
            "binCapacity": fill,
            "cover": "open",
            "lock": "unlock",
            "timestamp": ts,
            "uid": "bin-42",
            "upDn": "up",
        })
    }

    #[test]
    fn valid_payload_becomes_canonical_state() {
        let (m, _rx) = merger();
        m.on_message(TOPIC, telemetry(55.0, 1_700_000_000_000).to_string().as_bytes());

        let state = m.state().expect("state applied");
        assert_eq!(state.bin_id, "bin-42");
        assert_eq!(state.fill_level, 55.0);
        assert_eq!(state.cover, CoverState::Open);
        assert_eq!(state.lock, LockState::Unlocked);
        assert_eq!(state.position, PositionState::Up);
        assert_eq!(state.weight_grams, None);
        assert_eq!(m.history().len(), 1);
    }

    #[test]
    fn missing_field_rejects_whole_payload() {
        let (m, _rx) = merger();
        m.on_message(TOPIC, telemetry(55.0, 1_700_000_000_000).to_string().as_bytes());

        let mut partial = telemetry(99.0, 1_700_000_001_000);
        partial.as_object_mut().unwrap().remove("lock");
        m.on_message(TOPIC, partial.to_string().as_bytes());

        // nothing changed, not even the typed fields that were present
        assert_eq!(m.state().unwrap().fill_level, 55.0);
        assert_eq!(m.history().len(), 1);
    }

    #[test]
    fn wrongly_typed_field_rejects_whole_payload() {
        let (m, _rx) = merger();
        let mut bad = telemetry(10.0, 1_700_000_000_000);
        bad["binCapacity"] = json!("half full");
        m.on_message(TOPIC, bad.to_string().as_bytes());
        assert!(m.state().is_none());
        assert!(m.history().is_empty());
    }

    #[test]
    fn unparseable_payload_is_dropped() {
        let (m, _rx) = merger();
        m.on_message(TOPIC, b"not json at all {{{");
        assert!(m.state().is_none());
    }

    #[test]
    fn command_echo_never_mutates_state() {
        let (m, _rx) = merger();
        m.on_message(TOPIC, br#"{"command":"open"}"#);
        assert!(m.state().is_none());

        // even a fully telemetry-shaped payload carrying a command field is
        // treated as a command echo
        let mut echo = telemetry(77.0, 1_700_000_000_000);
        echo["command"] = json!("close");
        m.on_message(TOPIC, echo.to_string().as_bytes());
        assert!(m.state().is_none());
    }

    #[test]
    fn out_of_range_capacity_maps_to_zero() {
        let (m, _rx) = merger();
        m.on_message(TOPIC, telemetry(250.0, 1_700_000_000_000).to_string().as_bytes());
        assert_eq!(m.state().unwrap().fill_level, 0.0);

        m.on_message(TOPIC, telemetry(-3.0, 1_700_000_001_000).to_string().as_bytes());
        assert_eq!(m.state().unwrap().fill_level, 0.0);
        // both events were accepted (coerced, not rejected)
        assert_eq!(m.history().len(), 2);
    }

    #[test]
    fn out_of_order_update_is_dropped() {
        let (m, _rx) = merger();
        m.on_message(TOPIC, telemetry(60.0, 1_700_000_005_000).to_string().as_bytes());
        m.on_message(TOPIC, telemetry(10.0, 1_700_000_001_000).to_string().as_bytes());

        assert_eq!(m.state().unwrap().fill_level, 60.0);
        assert_eq!(m.history().len(), 1);

        // equal timestamp is not older: last write wins
        m.on_message(TOPIC, telemetry(61.0, 1_700_000_005_000).to_string().as_bytes());
        assert_eq!(m.state().unwrap().fill_level, 61.0);
    }

    #[test]
    fn feed_snapshot_uses_last_inserted_record() {
        let (m, _rx) = merger();
        let records = vec![
            json!({
                "binCapacity": 20.0, "cover": "close", "lock": "lock",
                "timestamp": "2024-06-01T10:00:00Z", "uid": "bin-42", "upDn": "down",
            }),
            json!({
                "binCapacity": 35.0, "cover": "open", "lock": "unlock",
                "timestamp": "2024-06-01T11:00:00Z", "uid": "bin-42", "upDn": "up",
                "weightInGrams": "123.5",
            }),
        ];
        m.on_feed_event(FeedEvent::Snapshot(records));

        let state = m.state().unwrap();
        assert_eq!(state.fill_level, 35.0);
        assert_eq!(state.weight_grams, Some(123.5));
        assert_eq!(m.history().len(), 1);
    }

    #[test]
    fn malformed_feed_record_is_rejected_whole() {
        let (m, _rx) = merger();
        m.on_feed_event(FeedEvent::Snapshot(vec![json!({
            "binCapacity": 20.0, "cover": "close",
            // lock / timestamp / uid / upDn missing
        })]));
        assert!(m.state().is_none());
    }

    #[test]
    fn thrown_item_updates_weight_and_alerts() {
        let (m, mut rx) = merger();
        m.on_message(TOPIC, telemetry(40.0, 1_700_000_000_000).to_string().as_bytes());

        m.on_feed_event(FeedEvent::ThrownItem(json!({
            "material": "Plastic",
            "weightInGrams": 250,
        })));

        let state = m.state().unwrap();
        assert_eq!(state.weight_grams, Some(250.0));
        assert_eq!(state.fill_level, 40.0); // capacity untouched
        assert_eq!(m.history().len(), 2);

        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.severity, AlertSeverity::Success);
        assert!(alert.message.contains("250"));
    }

    #[test]
    fn thrown_item_for_other_bin_is_ignored() {
        let (m, mut rx) = merger();
        m.on_message(TOPIC, telemetry(40.0, 1_700_000_000_000).to_string().as_bytes());

        m.on_feed_event(FeedEvent::ThrownItem(json!({
            "material": "glass",
            "weightInGrams": "99",
        })));

        assert_eq!(m.state().unwrap().weight_grams, None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn threshold_alert_flows_through_channel() {
        let (m, mut rx) = merger();
        m.on_message(TOPIC, telemetry(95.0, 1_700_000_000_000).to_string().as_bytes());

        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.severity, AlertSeverity::Warning);
        assert!(alert.message.contains("95"));

        // still above threshold: latched, no second alert
        m.on_message(TOPIC, telemetry(96.0, 1_700_000_001_000).to_string().as_bytes());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn weight_string_that_is_not_numeric_becomes_none() {
        let (m, _rx) = merger();
        let mut msg = telemetry(10.0, 1_700_000_000_000);
        msg["weightInGrams"] = json!("");
        m.on_message(TOPIC, msg.to_string().as_bytes());
        assert_eq!(m.state().unwrap().weight_grams, None);
    }

    #[test]
    fn numeric_weight_field_is_accepted() {
        // firmware revisions disagree on whether weight is a number or a
        // string; both shapes must pass the validation gate
        let (m, _rx) = merger();
        let mut msg = telemetry(10.0, 1_700_000_000_000);
        msg["weightInGrams"] = json!(321.5);
        m.on_message(TOPIC, msg.to_string().as_bytes());
        assert_eq!(m.state().unwrap().weight_grams, Some(321.5));

        let mut msg = telemetry(11.0, 1_700_000_001_000);
        msg["weightInGrams"] = json!("450");
        m.on_message(TOPIC, msg.to_string().as_bytes());
        assert_eq!(m.state().unwrap().weight_grams, Some(450.0));
    }
}
