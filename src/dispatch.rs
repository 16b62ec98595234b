//! Actuator command dispatch with optimistic intent and safety revert.

use rumqttc::{AsyncClient, QoS};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::alerts::AlertSender;
use crate::error::MonitorError;
use crate::models::{ActuatorIntent, AlertEvent, AlertSeverity, CommandMessage, IntendedState};
use crate::{shared, Shared};

/// Outbound seam of the dispatcher. The production implementation is the
/// shared MQTT client; tests substitute a recording publisher.
pub trait CommandPublisher: Send + Sync {
    fn publish_command(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<(), MonitorError>> + Send;
}

impl CommandPublisher for AsyncClient {
    async fn publish_command(&self, topic: &str, payload: Vec<u8>) -> Result<(), MonitorError> {
        self.publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(MonitorError::from)
    }
}

/// Translates user intent into `{"command": ...}` messages and keeps the
/// displayed [`IntendedState`] honest: after `revert_window` without a fresh
/// intent, all three fields fall back to the safe defaults.
///
/// The revert deliberately republishes nothing - the physical actuator may
/// stay in its last commanded position while the display shows defaults.
/// That mirrors the observed product behavior; see DESIGN.md before "fixing"
/// it.
pub struct Dispatcher<P: CommandPublisher> {
    publisher: P,
    command_topic: String,
    intent: Shared<IntendedState>,
    /// Bumped under the intent lock on every change; a pending revert only
    /// fires if the epoch it captured is still current, so a revert racing a
    /// fresh intent can never clobber it.
    epoch: Arc<AtomicU64>,
    /// At most one revert timer is alive at a time; rescheduling aborts the
    /// previous one and [`Dispatcher::cancel_revert`] releases it on teardown.
    pending_revert: Shared<Option<JoinHandle<()>>>,
    revert_window: Duration,
    alerts: AlertSender,
}

impl<P: CommandPublisher> Dispatcher<P> {
    pub fn new(
        publisher: P,
        command_topic: String,
        revert_window: Duration,
        alerts: AlertSender,
    ) -> Self {
        Self {
            publisher,
            command_topic,
            intent: shared(IntendedState::default()),
            epoch: Arc::new(AtomicU64::new(0)),
            pending_revert: shared(None),
            revert_window,
            alerts,
        }
    }

    pub fn intended(&self) -> IntendedState {
        *self.intent.lock()
    }

    /// Applies the intent optimistically, restarts the revert timer and
    /// publishes the command. Publish failures surface as error alerts, never
    /// as errors to the caller.
    pub async fn set_intent(&self, intent: ActuatorIntent) {
        let epoch = {
            let mut current = self.intent.lock();
            current.apply(intent);
            self.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };
        self.schedule_revert(epoch);

        let command = intent.command();
        let payload = match serde_json::to_vec(&CommandMessage { command }) {
            Ok(p) => p,
            Err(e) => {
                error!("failed to encode command {command:?}: {e}");
                return;
            }
        };
        match self.publisher.publish_command(&self.command_topic, payload).await {
            Ok(()) => debug!(topic = %self.command_topic, ?command, "command published"),
            Err(err) => {
                warn!(%err, ?command, "command publish failed");
                let _ = self.alerts.send(AlertEvent::new(
                    AlertSeverity::Error,
                    format!("Command publish failed: {err}"),
                ));
            }
        }
    }

    fn schedule_revert(&self, epoch: u64) {
        let intent = self.intent.clone();
        let counter = self.epoch.clone();
        let window = self.revert_window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let mut current = intent.lock();
            // Any newer set_intent bumped the epoch and owns its own timer;
            // the epoch check backstops an abort racing the wakeup.
            if counter.load(Ordering::SeqCst) == epoch {
                *current = IntendedState::default();
                debug!("intent reverted to safe defaults after inactivity");
            }
        });
        if let Some(stale) = self.pending_revert.lock().replace(handle) {
            stale.abort();
        }
    }

    /// Aborts the pending revert timer, if any. Called on monitor teardown so
    /// no timer outlives the dispatcher's owner.
    pub fn cancel_revert(&self) {
        if let Some(pending) = self.pending_revert.lock().take() {
            pending.abort();
        }
    }
}
