//! Per-bin monitor: wires the connection manager, the telemetry merger and
//! the command dispatcher into one handle for the display layer.

use rumqttc::AsyncClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::alerts::{alert_channel, AlertReceiver};
use crate::config::MonitorConfig;
use crate::connection::{ConnectionManager, LinkStatus};
use crate::dispatch::Dispatcher;
use crate::history::HistoryEntry;
use crate::merger::TelemetryMerger;
use crate::models::{ActuatorIntent, DeviceState, FeedEvent, IntendedState};

pub type FeedSender = mpsc::UnboundedSender<FeedEvent>;

/// One running monitor instance for one bin. Everything it owns - the MQTT
/// session, the feed listener task, the revert timers - is scoped to this
/// handle and released by [`BinMonitor::shutdown`].
pub struct BinMonitor {
    bin_type: String,
    merger: Arc<TelemetryMerger>,
    dispatcher: Dispatcher<AsyncClient>,
    connection: ConnectionManager,
    feed_tx: FeedSender,
    feed_task: JoinHandle<()>,
}

impl BinMonitor {
    /// Builds and starts the monitor. Returns the handle together with the
    /// alert stream the display layer consumes.
    pub fn start(cfg: &MonitorConfig, bin_type: &str) -> (Self, AlertReceiver) {
        let (alert_tx, alert_rx) = alert_channel();

        let merger = Arc::new(TelemetryMerger::new(bin_type, cfg, alert_tx.clone()));
        let connection =
            ConnectionManager::connect(cfg, bin_type, merger.clone(), alert_tx.clone());
        let dispatcher = Dispatcher::new(
            connection.client(),
            cfg.command_topic(bin_type),
            Duration::from_secs(cfg.revert_secs),
            alert_tx,
        );

        let (feed_tx, mut feed_rx) = mpsc::unbounded_channel::<FeedEvent>();
        let feed_task = tokio::spawn({
            let merger = merger.clone();
            async move {
                while let Some(event) = feed_rx.recv().await {
                    merger.on_feed_event(event);
                }
            }
        });

        info!(bin_type, "monitor started");
        (
            Self {
                bin_type: bin_type.to_string(),
                merger,
                dispatcher,
                connection,
                feed_tx,
                feed_task,
            },
            alert_rx,
        )
    }

    pub fn bin_type(&self) -> &str {
        &self.bin_type
    }

    /// Sender the push-feed adapter delivers into; clones are cheap.
    pub fn feed_sender(&self) -> FeedSender {
        self.feed_tx.clone()
    }

    pub fn state(&self) -> Option<DeviceState> {
        self.merger.state()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.merger.history()
    }

    pub fn link_status(&self) -> LinkStatus {
        self.connection.status()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn message_log(&self) -> Vec<String> {
        self.connection.message_log()
    }

    pub fn intended(&self) -> IntendedState {
        self.dispatcher.intended()
    }

    pub async fn set_intent(&self, intent: ActuatorIntent) {
        self.dispatcher.set_intent(intent).await;
    }

    /// Releases every resource: feed listener, revert timer, MQTT session,
    /// polling task.
    pub async fn shutdown(self) {
        self.dispatcher.cancel_revert();
        drop(self.feed_tx);
        self.feed_task.abort();
        let _ = self.feed_task.await;
        self.connection.shutdown().await;
        info!(bin_type = %self.bin_type, "monitor stopped");
    }
}
