//! Edge-triggered threshold alerting and the alert fan-out channel.

use tokio::sync::mpsc;
use tracing::debug;

use crate::config::ThresholdConf;
use crate::models::{AlertEvent, AlertSeverity, DeviceState};

pub type AlertSender = mpsc::UnboundedSender<AlertEvent>;
pub type AlertReceiver = mpsc::UnboundedReceiver<AlertEvent>;

/// Channel carrying transient alerts to the display layer. Unbounded: alerts
/// are small, rare and must never block the delivery loop.
pub fn alert_channel() -> (AlertSender, AlertReceiver) {
    mpsc::unbounded_channel()
}

/// One latched threshold. `notified` is the per-episode latch: it arms on the
/// first at-or-above sample and only rearms once the metric drops back below.
#[derive(Debug)]
struct MetricLatch {
    threshold: f64,
    notified: bool,
}

impl MetricLatch {
    fn new(threshold: f64) -> Self {
        Self {
            threshold,
            notified: false,
        }
    }

    /// Returns true exactly once per crossing episode.
    fn observe(&mut self, value: f64) -> bool {
        if value >= self.threshold {
            if !self.notified {
                self.notified = true;
                return true;
            }
        } else {
            self.notified = false;
        }
        false
    }
}

/// Evaluates canonical state against the deployment's thresholds. Which
/// metrics participate is configuration, not logic: weight alerting only
/// exists when a weight threshold is configured.
#[derive(Debug)]
pub struct ThresholdWatch {
    fill_level: MetricLatch,
    weight: Option<MetricLatch>,
}

impl ThresholdWatch {
    pub fn new(conf: &ThresholdConf) -> Self {
        Self {
            fill_level: MetricLatch::new(conf.fill_level),
            weight: conf.weight_grams.map(MetricLatch::new),
        }
    }

    pub fn evaluate(&mut self, state: &DeviceState) -> Vec<AlertEvent> {
        let mut fired = Vec::new();

        if self.fill_level.observe(state.fill_level) {
            debug!(fill_level = state.fill_level, "fill-level threshold crossed");
            fired.push(AlertEvent::new(
                AlertSeverity::Warning,
                format!("Bin capacity above threshold: {}", state.fill_level),
            ));
        }

        if let (Some(latch), Some(weight)) = (self.weight.as_mut(), state.weight_grams) {
            if latch.observe(weight) {
                debug!(weight_grams = weight, "weight threshold crossed");
                fired.push(AlertEvent::new(
                    AlertSeverity::Warning,
                    format!("Bin weight above threshold: {weight}g"),
                ));
            }
        }

        fired
    }
}
