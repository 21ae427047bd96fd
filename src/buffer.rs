use crate::datamodel::MetricDatum;
use anyhow::{Error, bail};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// Drained content of the buffer, grouped by namespace.
/// Each sequence keeps the insertion order of its data points.
pub type DrainedMetrics = HashMap<String, Vec<MetricDatum>>;

#[derive(Debug)]
struct BufferedDatum {
    namespace: Arc<str>,
    datum: MetricDatum,
}

/// Bounded accumulator of validated data points, partitioned by namespace.
///
/// All data points share one global FIFO queue so that overflow evicts the
/// oldest datum across every namespace. The queue never holds more than
/// `max_retained` entries.
#[derive(Debug)]
pub struct MetricsBuffer {
    max_retained: usize,
    entries: Mutex<VecDeque<BufferedDatum>>,
    evicted: AtomicU64,
}

impl MetricsBuffer {
    pub fn new(max_retained: usize) -> Result<Self, Error> {
        if max_retained == 0 {
            bail!("Maximum number of retained metrics is 0");
        }

        Ok(Self {
            max_retained,
            entries: Mutex::new(VecDeque::with_capacity(max_retained.min(8192))),
            evicted: AtomicU64::new(0),
        })
    }

    pub fn max_retained(&self) -> usize {
        self.max_retained
    }

    pub async fn add(&self, namespace: &str, datum: MetricDatum) {
        self.add_all(namespace, std::iter::once(datum)).await;
    }

    /// Inserts many data points under a single lock acquisition.
    pub async fn add_all(&self, namespace: &str, data: impl IntoIterator<Item = MetricDatum>) {
        let namespace: Arc<str> = Arc::from(namespace);
        let mut evicted = 0_u64;
        {
            let mut entries = self.entries.lock().await;
            for datum in data {
                if entries.len() >= self.max_retained {
                    entries.pop_front();
                    evicted += 1;
                }
                entries.push_back(BufferedDatum {
                    namespace: namespace.clone(),
                    datum,
                });
            }
        }

        if evicted > 0 {
            self.evicted.fetch_add(evicted, Ordering::Relaxed);
            debug!(
                "Metrics buffer is full ({} data points), evicted {} oldest data point(s)",
                self.max_retained, evicted
            );
        }
    }

    /// Removes and returns everything currently buffered.
    pub async fn drain(&self) -> DrainedMetrics {
        let entries = {
            let mut entries = self.entries.lock().await;
            std::mem::take(&mut *entries)
        };

        let mut grouped: HashMap<Arc<str>, Vec<MetricDatum>> = HashMap::new();
        for entry in entries {
            grouped.entry(entry.namespace).or_default().push(entry.datum);
        }

        grouped
            .into_iter()
            .map(|(namespace, data)| (namespace.to_string(), data))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Number of data points dropped by overflow since creation.
    pub fn evicted_total(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}
