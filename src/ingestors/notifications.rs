use crate::bus::MessageSink;
use crate::parsing::ValidationError;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub const NOTIFICATION_QUEUE_CAPACITY: usize = 256;

/// Asynchronous error response for a rejected inbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorNotification {
    #[serde(rename = "ErrorType")]
    pub error_type: String,
    #[serde(rename = "ErrorMessage")]
    pub error_message: String,
    #[serde(rename = "OperationId")]
    pub operation_id: String,
}

impl From<&ValidationError> for ErrorNotification {
    fn from(err: &ValidationError) -> Self {
        Self {
            error_type: err.error_type().to_string(),
            error_message: err.to_string(),
            // The inbound protocol carries no operation id.
            operation_id: String::new(),
        }
    }
}

pub fn notification_channel() -> (
    mpsc::Sender<ErrorNotification>,
    mpsc::Receiver<ErrorNotification>,
) {
    mpsc::channel(NOTIFICATION_QUEUE_CAPACITY)
}

/// Publishes queued notifications on the output topic of the local bus,
/// and of the shadow connection when one is given. Runs until every sender
/// is dropped. Failures are logged only.
pub fn spawn_notification_worker(
    mut receiver: mpsc::Receiver<ErrorNotification>,
    output_topic: String,
    local: Arc<dyn MessageSink>,
    mirror: Option<Arc<dyn MessageSink>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = receiver.recv().await {
            let payload = match serde_json::to_vec(&notification) {
                Ok(payload) => payload,
                Err(err) => {
                    error!("Failed to serialize error notification: {}", err);
                    continue;
                }
            };

            match local.send(&output_topic, payload.clone()).await {
                Ok(()) => debug!("Successfully published to local topic: {}", output_topic),
                Err(err) => error!(
                    "Failed to publish error notification to local topic {}: {}",
                    output_topic, err
                ),
            }

            if let Some(mirror) = &mirror {
                match mirror.send(&output_topic, payload).await {
                    Ok(()) => debug!("Successfully published to shadow topic: {}", output_topic),
                    Err(err) => error!(
                        "Failed to publish error notification to shadow topic {}: {}",
                        output_topic, err
                    ),
                }
            }
        }
        info!("Error notification worker stopped");
    })
}
