use super::{LogBackend, MetricsBackend, MqttBackend};
use crate::bus::MessageSink;
use crate::config::{BackendKind, ConnectorConfig};
use std::sync::Arc;

/// Builds the configured metrics backend. `bus` is the local bus, used by
/// backends that forward through it.
pub fn create_backend(
    config: &ConnectorConfig,
    bus: Arc<dyn MessageSink>,
) -> Arc<dyn MetricsBackend> {
    match config.backend {
        BackendKind::Log => Arc::new(LogBackend::new(&config.publish_region)),
        BackendKind::Mqtt => Arc::new(MqttBackend::new(
            bus,
            &config.backend_topic,
            &config.publish_region,
        )),
    }
}
