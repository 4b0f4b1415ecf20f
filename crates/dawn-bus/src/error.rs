//! Error types for the MQTT bridge.

use thiserror::Error;

/// Alias for `Result<T, BusError>`.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors raised by the bridge.
#[derive(Debug, Error)]
pub enum BusError {
    /// The MQTT client rejected an operation (publish, subscribe).
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// Bridge configuration is unusable.
    #[error("bus config error: {0}")]
    Config(String),

    /// A payload was not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
