use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

pub mod mqtt;

#[derive(Error, Debug)]
pub enum TransportError {
    /// The underlying bus connection could not be established.
    #[error("Failed to initialize the {name} connection: {reason}")]
    Initialization { name: String, reason: String },

    #[error("Invalid transport options: {0}")]
    InvalidOptions(String),

    #[error("Transport client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Transport operation timed out")]
    Timeout,
}

/// Outbound side of a message bus.
#[async_trait]
pub trait MessageSink: Send + Sync + Debug {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}
