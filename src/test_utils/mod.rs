//! Test utilities for edgemetrics tests
//!
//! In-memory stand-ins for the metrics backend and the message bus, plus
//! message fixtures shared by unit and integration tests.

use crate::bus::{MessageSink, TransportError};
use crate::config::mqtt::MqttConfig;
use crate::config::{
    BackendKind, ConnectorConfig, DEFAULT_INPUT_TOPIC, DEFAULT_OUTPUT_TOPIC,
    DEFAULT_PUBLISH_INTERVAL_SECONDS, DEFAULT_PUBLISH_TIMEOUT_SECONDS,
};
use crate::datamodel::MetricDatum;
use crate::publisher::{MetricsBackend, PublishError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

pub mod fixtures;

pub const TEST_DEVICE_NAME: &str = "test-device";

/// Configuration with small, test friendly values.
pub fn test_config() -> ConnectorConfig {
    ConnectorConfig {
        publish_region: "us-east-1".to_string(),
        publish_interval: Duration::from_secs(DEFAULT_PUBLISH_INTERVAL_SECONDS),
        max_metrics_to_retain: 100,
        input_topic: DEFAULT_INPUT_TOPIC.to_string(),
        output_topic: DEFAULT_OUTPUT_TOPIC.to_string(),
        pubsub_to_iot_core: false,
        device_name: TEST_DEVICE_NAME.to_string(),
        bus: MqttConfig::new("mqtt://127.0.0.1:1883"),
        shadow: None,
        backend: BackendKind::Log,
        backend_topic: "metrics/publish".to_string(),
        publish_timeout: Duration::from_secs(DEFAULT_PUBLISH_TIMEOUT_SECONDS),
        sentry_dsn: None,
    }
}

/// Metrics backend keeping every successful call in memory.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<(String, Vec<MetricDatum>)>>,
    failures: Mutex<HashMap<usize, PublishError>>,
    delay: Option<Duration>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` before completing.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Makes the call with the given zero-based index fail.
    pub async fn fail_call(&self, index: usize, error: PublishError) {
        self.failures.lock().await.insert(index, error);
    }

    pub async fn calls(&self) -> Vec<(String, Vec<MetricDatum>)> {
        self.calls.lock().await.clone()
    }

    pub async fn namespaces(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|(namespace, _)| namespace.clone())
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsBackend for RecordingBackend {
    async fn publish(&self, namespace: &str, chunk: &[MetricDatum]) -> Result<(), PublishError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.failures.lock().await.remove(&attempt) {
            return Err(error);
        }

        self.calls
            .lock()
            .await
            .push((namespace.to_string(), chunk.to_vec()));
        Ok(())
    }
}

/// Message sink keeping every sent message in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<(String, Vec<u8>)>>,
    failing: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose sends always time out.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub async fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.messages.lock().await.clone()
    }

    /// Waits until at least `count` messages were sent, or `timeout` elapsed.
    pub async fn wait_for_messages(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Vec<(String, Vec<u8>)> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let messages = self.messages().await;
            if messages.len() >= count || tokio::time::Instant::now() >= deadline {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.failing {
            return Err(TransportError::Timeout);
        }
        self.messages.lock().await.push((topic.to_string(), payload));
        Ok(())
    }
}
