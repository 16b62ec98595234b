//! Deployment configuration, loaded from YAML with sane defaults.
//!
//! Broker credentials and thresholds are deployment tuning, never embedded at
//! call sites: every component receives this struct (or a slice of it) at
//! construction.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use crate::history::DEFAULT_HISTORY_CAPACITY;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub mqtt: MqttConf,
    /// First segment of the shared topic convention `prefix/{bin_type}/{session_id}`.
    pub topic_prefix: String,
    /// Session segment of the topic; the dashboard and the devices agree on it
    /// out of band.
    pub session_id: String,
    pub thresholds: ThresholdConf,
    pub history_capacity: usize,
    /// Inactivity window after which displayed intent reverts to defaults.
    pub revert_secs: u64,
    /// Fixed interval between reconnect attempts after a transport error.
    pub reconnect_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConf {
    /// Fill-level alert threshold, percent.
    pub fill_level: f64,
    /// Optional weight alert threshold; weight alerting is off when absent.
    pub weight_grams: Option<f64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConf::default(),
            topic_prefix: "srb".into(),
            session_id: Uuid::new_v4().to_string(),
            thresholds: ThresholdConf::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            revert_secs: 30,
            reconnect_secs: 1,
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            username: None,
            password: None,
            client_id: None,
            keep_alive_secs: 30,
        }
    }
}

impl Default for ThresholdConf {
    fn default() -> Self {
        Self {
            fill_level: 90.0,
            weight_grams: None,
        }
    }
}

impl MonitorConfig {
    /// Telemetry topic for one bin. Commands share the same topic, which is
    /// why the merger must recognize and skip command-shaped payloads.
    pub fn data_topic(&self, bin_type: &str) -> String {
        format!(
            "{}/{}/{}",
            self.topic_prefix,
            bin_type.to_lowercase(),
            self.session_id
        )
    }

    pub fn command_topic(&self, bin_type: &str) -> String {
        self.data_topic(bin_type)
    }
}

/// Loads the config from `SRB_MONITOR_CONFIG` (default `monitor.yaml`),
/// falling back to defaults when the file is missing or invalid.
pub async fn load_config() -> MonitorConfig {
    let path = std::env::var("SRB_MONITOR_CONFIG").unwrap_or_else(|_| "monitor.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return MonitorConfig::default();
        }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            warn!(path = %path, "invalid config, using defaults: {e}");
            MonitorConfig::default()
        })
    } else {
        warn!(path = %path, "no config file, using defaults");
        MonitorConfig::default()
    }
}

/// Catalog text for the known bin types, shown by the display layer.
pub fn bin_description(bin_type: &str) -> &'static str {
    match bin_type.to_lowercase().as_str() {
        "plastic" => "This is a plastic bin used for recycling plastic waste.",
        "paper" => "This bin is used for paper recycling.",
        "metal" => "Use this bin for metal waste recycling.",
        "generalwaste" => "This bin is for general waste.",
        "glass" => "This bin is for glass waste recycling.",
        _ => "No details available.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_convention() {
        let cfg = MonitorConfig {
            topic_prefix: "srb".into(),
            session_id: "abc123".into(),
            ..MonitorConfig::default()
        };
        assert_eq!(cfg.data_topic("Plastic"), "srb/plastic/abc123");
        assert_eq!(cfg.command_topic("plastic"), cfg.data_topic("plastic"));
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg: MonitorConfig =
            serde_yaml::from_str("mqtt:\n  host: broker.local\nthresholds:\n  fill_level: 80\n")
                .unwrap();
        assert_eq!(cfg.mqtt.host, "broker.local");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.thresholds.fill_level, 80.0);
        assert_eq!(cfg.revert_secs, 30);
        assert_eq!(cfg.history_capacity, DEFAULT_HISTORY_CAPACITY);
    }

    #[test]
    fn unknown_bin_type_has_fallback_text() {
        assert_eq!(bin_description("unobtainium"), "No details available.");
        assert!(bin_description("GLASS").contains("glass"));
    }
}
