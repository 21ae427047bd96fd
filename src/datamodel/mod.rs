pub mod metric;
pub mod timestamp;
pub mod unit;

pub use metric::{
    Dimension, Dimensions, MAX_DIMENSIONS_PER_METRIC, MetricBatchRequest, MetricDatum,
};
pub use timestamp::{MetricDateTime, MetricDateTimeExt, now_unix_milliseconds};
pub use unit::StandardUnit;
