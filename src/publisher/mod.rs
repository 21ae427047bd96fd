use crate::buffer::DrainedMetrics;
use crate::config::ConnectorConfig;
use crate::datamodel::MetricDatum;
use async_trait::async_trait;
use sentry::integrations::anyhow::capture_anyhow;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

pub mod backend_factory;
pub mod logger;
pub mod mqtt;

pub use self::backend_factory::create_backend;
pub use self::logger::LogBackend;
pub use self::mqtt::MqttBackend;

/// Maximum number of data points the backend accepts in one publish call.
pub const MAX_METRIC_DATA_PER_PUBLISH: usize = 20;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    #[error("Publish timed out")]
    Timeout,

    #[error("Publish is not authorized: {0}")]
    Unauthorized(String),

    #[error("Publish transport failure: {0}")]
    Transport(String),
}

/// Client of the metrics backend. One call publishes one chunk; timeouts
/// and retries inside a call are the client's business.
#[async_trait]
pub trait MetricsBackend: Send + Sync + Debug {
    async fn publish(&self, namespace: &str, chunk: &[MetricDatum]) -> Result<(), PublishError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub chunks_sent: usize,
    pub chunks_failed: usize,
    pub data_points_sent: usize,
    pub data_points_dropped: usize,
}

impl PublishReport {
    pub fn merge(&mut self, other: PublishReport) {
        self.chunks_sent += other.chunks_sent;
        self.chunks_failed += other.chunks_failed;
        self.data_points_sent += other.data_points_sent;
        self.data_points_dropped += other.data_points_dropped;
    }

    pub fn is_empty(&self) -> bool {
        self.chunks_sent == 0 && self.chunks_failed == 0
    }
}

/// Splits drained data into backend-sized chunks and sends them.
///
/// Delivery is at most once: a failed chunk is logged and dropped, it is
/// neither retried nor put back in the buffer, and it does not stop the
/// chunks after it.
#[derive(Debug)]
pub struct Publisher {
    backend: Arc<dyn MetricsBackend>,
    chunk_size: usize,
    timeout: Duration,
}

impl Publisher {
    pub fn new(config: &ConnectorConfig, backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            backend,
            chunk_size: MAX_METRIC_DATA_PER_PUBLISH,
            timeout: config.publish_timeout,
        }
    }

    pub async fn publish_namespace(&self, namespace: &str, data: &[MetricDatum]) -> PublishReport {
        let mut report = PublishReport::default();

        for chunk in data.chunks(self.chunk_size) {
            let result = match tokio::time::timeout(
                self.timeout,
                self.backend.publish(namespace, chunk),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(PublishError::Timeout),
            };

            match result {
                Ok(()) => {
                    debug!(
                        "Published {} data point(s) to namespace {}",
                        chunk.len(),
                        namespace
                    );
                    report.chunks_sent += 1;
                    report.data_points_sent += chunk.len();
                }
                Err(err) => {
                    error!(
                        "Failed to publish {} data point(s) to namespace {}: {}",
                        chunk.len(),
                        namespace,
                        err
                    );
                    capture_anyhow(&anyhow::Error::new(err));
                    report.chunks_failed += 1;
                    report.data_points_dropped += chunk.len();
                }
            }
        }

        report
    }

    /// Publishes every namespace of a drain. Namespaces are sent
    /// concurrently, chunks of one namespace in order.
    pub async fn publish_all(&self, drained: DrainedMetrics) -> PublishReport {
        let reports = futures::future::join_all(
            drained
                .iter()
                .map(|(namespace, data)| self.publish_namespace(namespace, data)),
        )
        .await;

        let mut total = PublishReport::default();
        for report in reports {
            total.merge(report);
        }
        total
    }
}
