use super::{MetricsBackend, PublishError};
use crate::bus::{MessageSink, TransportError};
use crate::datamodel::MetricDatum;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PublishRequest<'a> {
    region: &'a str,
    namespace: &'a str,
    metric_data: &'a [MetricDatum],
}

/// Backend publishing each chunk as a JSON request on a bus topic, where a
/// bridge forwards it to the metrics service.
#[derive(Debug, Clone)]
pub struct MqttBackend {
    sink: Arc<dyn MessageSink>,
    topic: String,
    region: String,
}

impl MqttBackend {
    pub fn new(sink: Arc<dyn MessageSink>, topic: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            sink,
            topic: topic.into(),
            region: region.into(),
        }
    }
}

impl From<TransportError> for PublishError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => PublishError::Timeout,
            other => PublishError::Transport(other.to_string()),
        }
    }
}

#[async_trait]
impl MetricsBackend for MqttBackend {
    async fn publish(&self, namespace: &str, chunk: &[MetricDatum]) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(&PublishRequest {
            region: &self.region,
            namespace,
            metric_data: chunk,
        })
        .map_err(|err| PublishError::Transport(err.to_string()))?;

        self.sink.send(&self.topic, payload).await?;
        Ok(())
    }
}
