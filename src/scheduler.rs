use crate::buffer::MetricsBuffer;
use crate::config::{ConnectorConfig, DEFAULT_PUBLISH_INTERVAL_SECONDS};
use crate::publisher::{PublishReport, Publisher};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Periodically drains the buffer and hands the result to the publisher.
///
/// A round is awaited before the next tick is considered, so rounds never
/// overlap. Data is removed from the buffer when drained, whatever happens
/// to it afterwards.
#[derive(Debug)]
pub struct FlushScheduler {
    buffer: Arc<MetricsBuffer>,
    publisher: Arc<Publisher>,
    interval: Duration,
}

impl FlushScheduler {
    pub fn new(
        config: &ConnectorConfig,
        buffer: Arc<MetricsBuffer>,
        publisher: Arc<Publisher>,
    ) -> Self {
        let interval = if config.publish_interval.is_zero() {
            warn!(
                "Publish interval is zero, using the default of {} second(s)",
                DEFAULT_PUBLISH_INTERVAL_SECONDS
            );
            Duration::from_secs(DEFAULT_PUBLISH_INTERVAL_SECONDS)
        } else {
            config.publish_interval
        };
        Self {
            buffer,
            publisher,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn flush_once(&self) -> PublishReport {
        let drained = self.buffer.drain().await;
        if drained.is_empty() {
            debug!("Nothing to flush");
            return PublishReport::default();
        }

        let report = self.publisher.publish_all(drained).await;
        if report.chunks_failed > 0 {
            warn!(
                "Flush dropped {} data point(s) in {} failed chunk(s), sent {} data point(s)",
                report.data_points_dropped, report.chunks_failed, report.data_points_sent
            );
        } else {
            info!(
                "Flushed {} data point(s) in {} chunk(s)",
                report.data_points_sent, report.chunks_sent
            );
        }
        report
    }

    /// Ticks until `shutdown` is cancelled, then flushes one last time.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Flushing metrics every {} second(s)",
            self.interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Flushing remaining metrics before shutdown");
                    self.flush_once().await;
                    break;
                }
                _ = ticker.tick() => {
                    self.flush_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::MetricDatum;
    use crate::test_utils::{RecordingBackend, test_config};

    fn scheduler(backend: Arc<RecordingBackend>, interval: Duration) -> (FlushScheduler, Arc<MetricsBuffer>) {
        let mut config = test_config();
        config.publish_interval = interval;
        let buffer = Arc::new(MetricsBuffer::new(config.max_metrics_to_retain).unwrap());
        let publisher = Arc::new(Publisher::new(&config, backend));
        (
            FlushScheduler::new(&config, buffer.clone(), publisher),
            buffer,
        )
    }

    #[tokio::test]
    async fn test_flush_once_empty_buffer_publishes_nothing() {
        let backend = Arc::new(RecordingBackend::new());
        let (scheduler, _buffer) = scheduler(backend.clone(), Duration::from_secs(10));

        let report = scheduler.flush_once().await;
        assert!(report.is_empty());
        assert_eq!(backend.attempts(), 0);
    }

    #[tokio::test]
    async fn test_flush_once_drains_even_when_publish_fails() {
        let backend = Arc::new(RecordingBackend::new());
        backend
            .fail_call(0, crate::publisher::PublishError::Transport("down".to_string()))
            .await;
        let (scheduler, buffer) = scheduler(backend.clone(), Duration::from_secs(10));

        buffer.add("Demo", MetricDatum::new("CPU", 1.0, 0)).await;
        let report = scheduler.flush_once().await;

        assert_eq!(report.chunks_failed, 1);
        assert!(buffer.is_empty().await);
        // Nothing comes back on the next round
        assert!(scheduler.flush_once().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_flushes_on_each_tick() {
        let backend = Arc::new(RecordingBackend::new());
        let (scheduler, buffer) = scheduler(backend.clone(), Duration::from_secs(10));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        buffer.add("Demo", MetricDatum::new("first", 1.0, 0)).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(backend.attempts(), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(backend.attempts(), 1);

        buffer.add("Demo", MetricDatum::new("second", 2.0, 0)).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.attempts(), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_uses_default() {
        let backend = Arc::new(RecordingBackend::new());
        let (scheduler, buffer) = scheduler(backend.clone(), Duration::ZERO);
        assert_eq!(
            scheduler.interval(),
            Duration::from_secs(DEFAULT_PUBLISH_INTERVAL_SECONDS)
        );

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));
        buffer.add("Demo", MetricDatum::new("CPU", 1.0, 0)).await;
        tokio::time::sleep(Duration::from_secs(DEFAULT_PUBLISH_INTERVAL_SECONDS + 1)).await;
        assert_eq!(backend.attempts(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_rounds_do_not_overlap() {
        let backend = Arc::new(RecordingBackend::with_delay(Duration::from_secs(25)));
        let mut config = test_config();
        config.publish_interval = Duration::from_secs(10);
        config.publish_timeout = Duration::from_secs(60);
        let buffer = Arc::new(MetricsBuffer::new(config.max_metrics_to_retain).unwrap());
        let publisher = Arc::new(Publisher::new(&config, backend.clone()));
        let scheduler = FlushScheduler::new(&config, buffer.clone(), publisher);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        buffer.add("Demo", MetricDatum::new("CPU", 1.0, 0)).await;
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            buffer.add("Demo", MetricDatum::new("CPU", 1.0, 0)).await;
            assert!(backend.max_in_flight() <= 1);
        }

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(backend.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_remaining_data() {
        let backend = Arc::new(RecordingBackend::new());
        let (scheduler, buffer) = scheduler(backend.clone(), Duration::from_secs(900));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        buffer.add("Demo", MetricDatum::new("CPU", 1.0, 0)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(backend.calls().await.len(), 1);
        assert!(buffer.is_empty().await);
    }
}
