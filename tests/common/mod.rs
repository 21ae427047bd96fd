use edgemetrics::buffer::MetricsBuffer;
use edgemetrics::config::ConnectorConfig;
use edgemetrics::ingestors::{MetricsIngestor, notification_channel, spawn_notification_worker};
use edgemetrics::publisher::Publisher;
use edgemetrics::scheduler::FlushScheduler;
use edgemetrics::test_utils::{RecordingBackend, RecordingSink, test_config};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything but the MQTT transport, wired the way the binary wires it.
pub struct TestPipeline {
    pub config: ConnectorConfig,
    pub buffer: Arc<MetricsBuffer>,
    pub ingestor: Arc<MetricsIngestor>,
    pub backend: Arc<RecordingBackend>,
    pub local_bus: Arc<RecordingSink>,
    pub shadow_bus: Arc<RecordingSink>,
    scheduler: Option<FlushScheduler>,
    _notification_worker: JoinHandle<()>,
}

#[allow(dead_code)] // Each test file uses a different subset
impl TestPipeline {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ConnectorConfig) -> Self {
        let buffer = Arc::new(MetricsBuffer::new(config.max_metrics_to_retain).unwrap());
        let backend = Arc::new(RecordingBackend::new());
        let local_bus = Arc::new(RecordingSink::new());
        let shadow_bus = Arc::new(RecordingSink::new());

        let (sender, receiver) = notification_channel();
        let mirror = if config.pubsub_to_iot_core {
            Some(shadow_bus.clone() as Arc<dyn edgemetrics::bus::MessageSink>)
        } else {
            None
        };
        let notification_worker = spawn_notification_worker(
            receiver,
            config.output_topic.clone(),
            local_bus.clone(),
            mirror,
        );

        let ingestor = Arc::new(MetricsIngestor::new(&config, buffer.clone(), sender));
        let publisher = Arc::new(Publisher::new(&config, backend.clone()));
        let scheduler = FlushScheduler::new(&config, buffer.clone(), publisher);

        Self {
            config,
            buffer,
            ingestor,
            backend,
            local_bus,
            shadow_bus,
            scheduler: Some(scheduler),
            _notification_worker: notification_worker,
        }
    }

    /// Starts the periodic flush, returns the token stopping it.
    pub fn start_scheduler(&mut self) -> (CancellationToken, JoinHandle<()>) {
        let scheduler = self.scheduler.take().expect("scheduler already started");
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));
        (shutdown, handle)
    }

    pub fn scheduler(&self) -> &FlushScheduler {
        self.scheduler.as_ref().expect("scheduler already started")
    }
}
