use crate::buffer::MetricsBuffer;
use crate::config::ConnectorConfig;
use crate::datamodel::{Dimension, MetricBatchRequest};
use crate::parsing::{self, ValidationError};
use sentry::integrations::anyhow::capture_anyhow;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

pub mod notifications;

pub use notifications::{ErrorNotification, notification_channel, spawn_notification_worker};

/// Name of the dimension identifying the device a datum comes from.
pub const DEVICE_DIMENSION_NAME: &str = "coreName";

/// Ingress adapter shared by every bus listener.
///
/// Valid messages end up in the buffer, each datum tagged with the device
/// dimension. Rejected messages are logged and answered with an error
/// notification, queued without waiting for it to be published.
#[derive(Debug)]
pub struct MetricsIngestor {
    buffer: Arc<MetricsBuffer>,
    device_name: String,
    notifications: mpsc::Sender<ErrorNotification>,
}

impl MetricsIngestor {
    pub fn new(
        config: &ConnectorConfig,
        buffer: Arc<MetricsBuffer>,
        notifications: mpsc::Sender<ErrorNotification>,
    ) -> Self {
        Self {
            buffer,
            device_name: config.device_name.clone(),
            notifications,
        }
    }

    /// Returns the number of data points buffered.
    pub async fn ingest(&self, raw: &Value) -> Result<usize, ValidationError> {
        debug!("Received new message: {}", raw);
        let result = parsing::parse_message(raw);
        self.store(result).await
    }

    pub async fn ingest_bytes(&self, data: &[u8]) -> Result<usize, ValidationError> {
        let result = parsing::parse_slice(data);
        self.store(result).await
    }

    async fn store(
        &self,
        result: Result<Vec<MetricBatchRequest>, ValidationError>,
    ) -> Result<usize, ValidationError> {
        let requests = match result {
            Ok(requests) => requests,
            Err(err) => {
                self.reject(&err);
                return Err(err);
            }
        };

        let mut count = 0;
        for request in requests {
            count += request.len();
            let device_dimension = Dimension::new(DEVICE_DIMENSION_NAME, &self.device_name);
            self.buffer
                .add_all(
                    &request.namespace,
                    request
                        .metric_data
                        .into_iter()
                        .map(|datum| datum.with_dimension(device_dimension.clone())),
                )
                .await;
        }
        Ok(count)
    }

    fn reject(&self, err: &ValidationError) {
        error!("Rejected metrics message: {}", err);
        capture_anyhow(&anyhow::Error::new(err.clone()));

        let notification = ErrorNotification::from(err);
        match self.notifications.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Error notification queue is full, dropping the notification")
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Error notification worker is gone, dropping the notification")
            }
        }
    }
}
