use thiserror::Error;

/// Reasons an inbound message is rejected. The whole message is dropped
/// whenever one of these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("input is empty")]
    Empty,

    #[error("input is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("mandatory field ({field}) is not an object in the input")]
    NotAnObject { field: &'static str },

    #[error("mandatory field ({field}) is absent in the input")]
    MissingField { field: &'static str },

    #[error("mandatory field ({field}) is absent in the dimension")]
    MissingDimensionField { field: &'static str },

    #[error(
        "Incorrect payload format, field ({field}) must be an object or a list of objects"
    )]
    InvalidMetricData { field: &'static str },

    #[error("field ({field}) must contain at least one entry")]
    EmptyMetricData { field: &'static str },

    #[error("field ({field}) is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("field ({field}) is not a number")]
    NotANumber { field: &'static str },

    #[error("field ({field}) is not a valid value ({unit}), must be one of the standard units")]
    InvalidUnit { field: &'static str, unit: String },

    #[error("More than ({max}) entries present in field ({field}): {count}")]
    TooManyDimensions {
        field: &'static str,
        count: usize,
        max: usize,
    },
}

impl ValidationError {
    /// Stable identifier used as the error type of outbound notifications.
    pub fn error_type(&self) -> &'static str {
        "ValidationError"
    }
}
