use thiserror::Error;

/// Failure taxonomy of the monitor core. None of these are fatal: transport
/// errors feed the reconnect loop, validation and range errors drop or coerce
/// the offending payload and the last-known-good state stays visible.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Publish/subscribe request could not be queued on the MQTT client.
    #[error("transport failure: {0}")]
    Transport(#[from] rumqttc::ClientError),

    /// The broker connection itself failed; handled by the reconnect loop.
    #[error("connection lost: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    /// Malformed or incomplete telemetry payload, rejected as a whole.
    #[error("invalid telemetry payload: {0}")]
    Validation(String),

    /// A metric left its expected range and was coerced to a safe default.
    #[error("metric out of range: {metric}={value}")]
    Range { metric: &'static str, value: f64 },

    #[error("invalid configuration: {0}")]
    Config(String),
}
