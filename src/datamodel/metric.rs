use super::unit::StandardUnit;
use serde::Serialize;
use smallvec::SmallVec;

/// Maximum number of dimensions a sender may attach to one datum.
/// The ingestion path appends the device dimension on top of these.
pub const MAX_DIMENSIONS_PER_METRIC: usize = 9;

/// A name/value tag used by the backend for filtering and breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

pub type Dimensions = SmallVec<[Dimension; 4]>;

/// One validated observation, serialized with the backend field names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDatum {
    #[serde(rename = "MetricName")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: f64,
    #[serde(rename = "Unit")]
    pub unit: StandardUnit,
    /// Unix milliseconds
    #[serde(rename = "Timestamp")]
    pub timestamp_ms: i64,
    #[serde(rename = "Dimensions")]
    pub dimensions: Dimensions,
}

impl MetricDatum {
    pub fn new(name: impl Into<String>, value: f64, timestamp_ms: i64) -> Self {
        Self {
            name: name.into(),
            value,
            unit: StandardUnit::default(),
            timestamp_ms,
            dimensions: Dimensions::new(),
        }
    }

    pub fn with_unit(mut self, unit: StandardUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.push(dimension);
        self
    }
}

/// The validated content of one inbound request envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricBatchRequest {
    pub namespace: String,
    pub metric_data: Vec<MetricDatum>,
}

impl MetricBatchRequest {
    pub fn len(&self) -> usize {
        self.metric_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metric_data.is_empty()
    }
}
