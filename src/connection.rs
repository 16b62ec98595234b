//! MQTT connection lifecycle: connect, subscribe, reconnect, teardown.

use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerts::AlertSender;
use crate::config::MonitorConfig;
use crate::history::HistoryRing;
use crate::merger::TelemetryMerger;
use crate::models::{AlertEvent, AlertSeverity};
use crate::{shared, Shared};

/// Observable connection lifecycle. There is no terminal state in normal
/// operation: after an error the loop keeps retrying until shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl LinkStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Owns the MQTT client and its polling task. Incoming publishes on the bin's
/// data topic are logged and handed to the merger; lifecycle transitions are
/// surfaced as alerts and through the status flag. `DeviceState` is never
/// cleared here - on connection loss the last-known-good state stays visible.
pub struct ConnectionManager {
    client: AsyncClient,
    status: Shared<LinkStatus>,
    message_log: Shared<HistoryRing<String>>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn connect(
        cfg: &MonitorConfig,
        bin_type: &str,
        merger: Arc<TelemetryMerger>,
        alerts: AlertSender,
    ) -> Self {
        let client_id = cfg
            .mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| format!("srb-monitor-{}", Uuid::new_v4()));
        let mut options = MqttOptions::new(client_id, &cfg.mqtt.host, cfg.mqtt.port);
        options.set_keep_alive(Duration::from_secs(cfg.mqtt.keep_alive_secs));
        if let (Some(user), Some(pass)) = (&cfg.mqtt.username, &cfg.mqtt.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let status = shared(LinkStatus::Connecting);
        let message_log = shared(HistoryRing::new(cfg.history_capacity));
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let data_topic = cfg.data_topic(bin_type);
        let reconnect_delay = Duration::from_secs(cfg.reconnect_secs);

        let task = tokio::spawn({
            let client = client.clone();
            let status = status.clone();
            let message_log = message_log.clone();
            async move {
                info!(topic = %data_topic, "connecting to broker");
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        event = eventloop.poll() => match event {
                            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                                *status.lock() = LinkStatus::Connected;
                                info!("broker connection established");
                                // one subscription per connection instance;
                                // a reconnect lands here again and resubscribes
                                match client.subscribe(&data_topic, QoS::AtLeastOnce).await {
                                    Ok(()) => info!(topic = %data_topic, "subscribed"),
                                    Err(e) => {
                                        error!(topic = %data_topic, "subscribe failed: {e}");
                                        let _ = alerts.send(AlertEvent::new(
                                            AlertSeverity::Error,
                                            "Subscription error.",
                                        ));
                                    }
                                }
                            }
                            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                                if publish.topic != data_topic {
                                    continue;
                                }
                                if let Ok(text) = String::from_utf8(publish.payload.to_vec()) {
                                    message_log.lock().append(text);
                                }
                                merger.on_message(&publish.topic, &publish.payload);
                            }
                            Ok(Event::Incoming(Incoming::Disconnect)) => {
                                *status.lock() = LinkStatus::Disconnected;
                                info!("broker closed the connection");
                                let _ = alerts.send(AlertEvent::new(
                                    AlertSeverity::Info,
                                    "MQTT connection closed.",
                                ));
                            }
                            Ok(other) => debug!(?other, "mqtt event"),
                            Err(e) => {
                                // the failed session is torn down before the
                                // next poll, so retries never stack sessions
                                *status.lock() = LinkStatus::Error;
                                warn!("MQTT connection error: {e}");
                                let _ = alerts.send(AlertEvent::new(
                                    AlertSeverity::Error,
                                    "MQTT connection error.",
                                ));
                                tokio::time::sleep(reconnect_delay).await;
                                *status.lock() = LinkStatus::Reconnecting;
                                let _ = alerts.send(AlertEvent::new(
                                    AlertSeverity::Info,
                                    "Reconnecting to MQTT broker...",
                                ));
                            }
                        }
                    }
                }
                let _ = client.disconnect().await;
                *status.lock() = LinkStatus::Disconnected;
                debug!("connection task stopped");
            }
        });

        Self {
            client,
            status,
            message_log,
            shutdown,
            task: Some(task),
        }
    }

    /// Handle for outbound publishes; commands go out over the same session
    /// the telemetry comes in on.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Raw payloads received on the data topic, oldest first, bounded like
    /// the history ring.
    pub fn message_log(&self) -> Vec<String> {
        self.message_log.lock().snapshot()
    }

    /// Stops the polling task and disconnects. Safe to call once on any exit
    /// path; dropping the manager without calling it aborts the task.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}
