//! Validation of inbound metric messages.
//!
//! A message is either one request envelope or a JSON array of envelopes:
//!
//! ```json
//! {"request": {"namespace": "Demo", "metricData": {"metricName": "CPU", "metricValue": 42}}}
//! ```
//!
//! Validation is all-or-nothing: one malformed datum anywhere in the message
//! rejects the whole message. Nothing here performs I/O.

use serde_json::{Map, Value};
use std::str::FromStr;

use crate::datamodel::{
    Dimension, Dimensions, MAX_DIMENSIONS_PER_METRIC, MetricBatchRequest, MetricDatum,
    StandardUnit, now_unix_milliseconds,
};

pub mod error;
pub use error::ValidationError;

pub const FIELD_REQUEST: &str = "request";
pub const FIELD_NAMESPACE: &str = "namespace";
pub const FIELD_METRIC_DATA: &str = "metricData";
pub const FIELD_METRIC_NAME: &str = "metricName";
pub const FIELD_METRIC_VALUE: &str = "metricValue";
pub const FIELD_METRIC_VALUE_ALIAS: &str = "value";
pub const FIELD_METRIC_UNIT: &str = "unit";
pub const FIELD_METRIC_TIMESTAMP: &str = "timestamp";
pub const FIELD_DIMENSIONS: &str = "dimensions";
pub const FIELD_DIMENSION_NAME: &str = "name";
pub const FIELD_DIMENSION_VALUE: &str = "value";

/// Decodes a wire payload and parses every request it carries.
pub fn parse_slice(data: &[u8]) -> Result<Vec<MetricBatchRequest>, ValidationError> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(ValidationError::Empty);
    }
    let raw: Value = serde_json::from_slice(data)
        .map_err(|err| ValidationError::InvalidJson(err.to_string()))?;
    parse_message(&raw)
}

/// Parses a message holding a single envelope or an array of envelopes.
pub fn parse_message(raw: &Value) -> Result<Vec<MetricBatchRequest>, ValidationError> {
    match raw {
        Value::Array(envelopes) => {
            if envelopes.is_empty() {
                return Err(ValidationError::Empty);
            }
            envelopes.iter().map(parse).collect()
        }
        _ => parse(raw).map(|request| vec![request]),
    }
}

/// Parses one request envelope.
pub fn parse(raw: &Value) -> Result<MetricBatchRequest, ValidationError> {
    if is_empty(raw) {
        return Err(ValidationError::Empty);
    }

    let envelope = raw.as_object().ok_or(ValidationError::NotAnObject {
        field: FIELD_REQUEST,
    })?;

    let request = match envelope.get(FIELD_REQUEST) {
        None | Some(Value::Null) => {
            return Err(ValidationError::MissingField {
                field: FIELD_REQUEST,
            });
        }
        Some(request) => request.as_object().ok_or(ValidationError::NotAnObject {
            field: FIELD_REQUEST,
        })?,
    };

    let namespace = required_string(request, FIELD_NAMESPACE)?;

    let metric_data = match request.get(FIELD_METRIC_DATA) {
        None | Some(Value::Null) => {
            return Err(ValidationError::MissingField {
                field: FIELD_METRIC_DATA,
            });
        }
        Some(Value::Object(datum)) => vec![parse_datum(datum)?],
        Some(Value::Array(data)) => {
            if data.is_empty() {
                return Err(ValidationError::EmptyMetricData {
                    field: FIELD_METRIC_DATA,
                });
            }
            data.iter()
                .map(|datum| match datum {
                    Value::Object(datum) => parse_datum(datum),
                    _ => Err(ValidationError::InvalidMetricData {
                        field: FIELD_METRIC_DATA,
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?
        }
        Some(_) => {
            return Err(ValidationError::InvalidMetricData {
                field: FIELD_METRIC_DATA,
            });
        }
    };

    Ok(MetricBatchRequest {
        namespace,
        metric_data,
    })
}

fn is_empty(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(array) => array.is_empty(),
        Value::String(string) => string.is_empty(),
        _ => false,
    }
}

fn present<'a>(object: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    object.get(field).filter(|value| !value.is_null())
}

fn required_string(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<String, ValidationError> {
    match present(object, field) {
        None => Err(ValidationError::MissingField { field }),
        Some(Value::String(string)) if !string.is_empty() => Ok(string.clone()),
        Some(Value::String(_)) => Err(ValidationError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        }),
        Some(_) => Err(ValidationError::InvalidField {
            field,
            reason: "must be a string".to_string(),
        }),
    }
}

fn parse_datum(datum: &Map<String, Value>) -> Result<MetricDatum, ValidationError> {
    let name = required_string(datum, FIELD_METRIC_NAME)?;

    let value = match present(datum, FIELD_METRIC_VALUE)
        .or_else(|| present(datum, FIELD_METRIC_VALUE_ALIAS))
    {
        None => {
            return Err(ValidationError::MissingField {
                field: FIELD_METRIC_VALUE,
            });
        }
        Some(value) => finite_number(value).ok_or(ValidationError::NotANumber {
            field: FIELD_METRIC_VALUE,
        })?,
    };

    let unit = match present(datum, FIELD_METRIC_UNIT) {
        None => StandardUnit::default(),
        Some(Value::String(unit)) => {
            StandardUnit::from_str(unit).map_err(|_| ValidationError::InvalidUnit {
                field: FIELD_METRIC_UNIT,
                unit: unit.clone(),
            })?
        }
        Some(other) => {
            return Err(ValidationError::InvalidUnit {
                field: FIELD_METRIC_UNIT,
                unit: other.to_string(),
            });
        }
    };

    let timestamp_ms = match present(datum, FIELD_METRIC_TIMESTAMP) {
        None => now_unix_milliseconds(),
        Some(timestamp) => timestamp_millis(timestamp)?,
    };

    let dimensions = match present(datum, FIELD_DIMENSIONS) {
        None => Dimensions::new(),
        Some(dimensions) => parse_dimensions(dimensions)?,
    };

    Ok(MetricDatum {
        name,
        value,
        unit,
        timestamp_ms,
        dimensions,
    })
}

fn finite_number(value: &Value) -> Option<f64> {
    value.as_f64().filter(|number| number.is_finite())
}

fn timestamp_millis(timestamp: &Value) -> Result<i64, ValidationError> {
    if let Some(millis) = timestamp.as_i64() {
        return Ok(millis);
    }
    let millis = finite_number(timestamp).ok_or(ValidationError::NotANumber {
        field: FIELD_METRIC_TIMESTAMP,
    })?;
    // i64::MAX as f64 rounds up to 2^63, which is already out of range
    if millis < i64::MIN as f64 || millis >= i64::MAX as f64 {
        return Err(ValidationError::InvalidField {
            field: FIELD_METRIC_TIMESTAMP,
            reason: "out of range".to_string(),
        });
    }
    Ok(millis as i64)
}

fn parse_dimensions(dimensions: &Value) -> Result<Dimensions, ValidationError> {
    let dimensions = dimensions
        .as_array()
        .ok_or_else(|| ValidationError::InvalidField {
            field: FIELD_DIMENSIONS,
            reason: "must be a list".to_string(),
        })?;

    if dimensions.len() > MAX_DIMENSIONS_PER_METRIC {
        return Err(ValidationError::TooManyDimensions {
            field: FIELD_DIMENSIONS,
            count: dimensions.len(),
            max: MAX_DIMENSIONS_PER_METRIC,
        });
    }

    dimensions
        .iter()
        .map(|dimension| {
            let dimension = dimension
                .as_object()
                .ok_or_else(|| ValidationError::InvalidField {
                    field: FIELD_DIMENSIONS,
                    reason: "every dimension must be an object".to_string(),
                })?;
            Ok(Dimension {
                name: dimension_field(dimension, FIELD_DIMENSION_NAME)?,
                value: dimension_field(dimension, FIELD_DIMENSION_VALUE)?,
            })
        })
        .collect()
}

// Numbers and booleans are accepted and kept in their JSON spelling.
fn dimension_field(
    dimension: &Map<String, Value>,
    field: &'static str,
) -> Result<String, ValidationError> {
    match present(dimension, field) {
        None => Err(ValidationError::MissingDimensionField { field }),
        Some(Value::String(string)) => Ok(string.clone()),
        Some(value @ (Value::Number(_) | Value::Bool(_))) => Ok(value.to_string()),
        Some(_) => Err(ValidationError::InvalidField {
            field,
            reason: "dimension fields must be strings".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(metric_data: Value) -> Value {
        json!({"request": {"namespace": "Demo", "metricData": metric_data}})
    }

    #[test]
    fn test_parse_single_datum_with_defaults() {
        let before = now_unix_milliseconds();
        let request = parse(&envelope(json!({"metricName": "CPU", "metricValue": 42}))).unwrap();
        let after = now_unix_milliseconds();

        assert_eq!(request.namespace, "Demo");
        assert_eq!(request.len(), 1);
        let datum = &request.metric_data[0];
        assert_eq!(datum.name, "CPU");
        assert_eq!(datum.value, 42.0);
        assert_eq!(datum.unit, StandardUnit::Count);
        assert!(datum.dimensions.is_empty());
        assert!(datum.timestamp_ms >= before && datum.timestamp_ms <= after);
    }

    #[test]
    fn test_parse_full_datum() {
        let request = parse(&envelope(json!({
            "metricName": "Temperature",
            "metricValue": 21.5,
            "unit": "Percent",
            "timestamp": 1704067200123i64,
            "dimensions": [
                {"name": "room", "value": "kitchen"},
                {"name": "floor", "value": 2}
            ]
        })))
        .unwrap();

        let datum = &request.metric_data[0];
        assert_eq!(datum.value, 21.5);
        assert_eq!(datum.unit, StandardUnit::Percent);
        assert_eq!(datum.timestamp_ms, 1704067200123);
        assert_eq!(
            datum.dimensions.as_slice(),
            &[
                Dimension::new("room", "kitchen"),
                Dimension::new("floor", "2")
            ]
        );
    }

    #[test]
    fn test_parse_timestamp_out_of_range() {
        let error = parse(&envelope(json!({
            "metricName": "Temperature",
            "metricValue": 21.5,
            "timestamp": 1e30
        })))
        .unwrap_err();
        assert!(matches!(
            error,
            ValidationError::InvalidField {
                field: FIELD_METRIC_TIMESTAMP,
                ..
            }
        ));

        let request = parse(&envelope(json!({
            "metricName": "Temperature",
            "metricValue": 21.5,
            "timestamp": 1704067200123.0
        })))
        .unwrap();
        assert_eq!(request.metric_data[0].timestamp_ms, 1704067200123);
    }

    #[test]
    fn test_parse_value_alias() {
        let request = parse(&envelope(json!({"metricName": "CPU", "value": 7}))).unwrap();
        assert_eq!(request.metric_data[0].value, 7.0);
    }

    #[test]
    fn test_parse_list_of_data_keeps_order() {
        let request = parse(&envelope(json!([
            {"metricName": "a", "metricValue": 1},
            {"metricName": "b", "metricValue": 2},
            {"metricName": "c", "metricValue": 3}
        ])))
        .unwrap();
        let names: Vec<_> = request.metric_data.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(parse(&Value::Null), Err(ValidationError::Empty));
        assert_eq!(parse(&json!({})), Err(ValidationError::Empty));
        assert_eq!(parse(&json!("")), Err(ValidationError::Empty));
        assert_eq!(parse_message(&json!([])), Err(ValidationError::Empty));
        assert_eq!(parse_slice(b"  \n"), Err(ValidationError::Empty));
    }

    #[test]
    fn test_missing_envelope() {
        assert_eq!(
            parse(&json!({"namespace": "Demo"})),
            Err(ValidationError::MissingField {
                field: FIELD_REQUEST
            })
        );
        assert_eq!(
            parse(&json!({"request": "nope"})),
            Err(ValidationError::NotAnObject {
                field: FIELD_REQUEST
            })
        );
        assert_eq!(
            parse(&json!(12)),
            Err(ValidationError::NotAnObject {
                field: FIELD_REQUEST
            })
        );
    }

    #[test]
    fn test_missing_namespace_or_metric_data() {
        assert_eq!(
            parse(&json!({"request": {"metricData": {"metricName": "CPU", "metricValue": 1}}})),
            Err(ValidationError::MissingField {
                field: FIELD_NAMESPACE
            })
        );
        assert_eq!(
            parse(&json!({"request": {"namespace": "Demo"}})),
            Err(ValidationError::MissingField {
                field: FIELD_METRIC_DATA
            })
        );
        assert!(matches!(
            parse(&json!({"request": {"namespace": "", "metricData": {}}})),
            Err(ValidationError::InvalidField {
                field: FIELD_NAMESPACE,
                ..
            })
        ));
    }

    #[test]
    fn test_metric_data_shape() {
        assert_eq!(
            parse(&envelope(json!("CPU"))),
            Err(ValidationError::InvalidMetricData {
                field: FIELD_METRIC_DATA
            })
        );
        assert_eq!(
            parse(&envelope(json!([]))),
            Err(ValidationError::EmptyMetricData {
                field: FIELD_METRIC_DATA
            })
        );
        assert_eq!(
            parse(&envelope(json!([{"metricName": "a", "metricValue": 1}, 3]))),
            Err(ValidationError::InvalidMetricData {
                field: FIELD_METRIC_DATA
            })
        );
    }

    #[test]
    fn test_datum_name_and_value() {
        assert_eq!(
            parse(&envelope(json!({"metricValue": 1}))),
            Err(ValidationError::MissingField {
                field: FIELD_METRIC_NAME
            })
        );
        assert_eq!(
            parse(&envelope(json!({"metricName": "CPU"}))),
            Err(ValidationError::MissingField {
                field: FIELD_METRIC_VALUE
            })
        );
        assert_eq!(
            parse(&envelope(json!({"metricName": "CPU", "metricValue": "42"}))),
            Err(ValidationError::NotANumber {
                field: FIELD_METRIC_VALUE
            })
        );
        assert_eq!(
            parse(&envelope(json!({"metricName": "CPU", "metricValue": true}))),
            Err(ValidationError::NotANumber {
                field: FIELD_METRIC_VALUE
            })
        );
    }

    #[test]
    fn test_invalid_unit() {
        assert_eq!(
            parse(&envelope(
                json!({"metricName": "CPU", "metricValue": 1, "unit": "Bogus"})
            )),
            Err(ValidationError::InvalidUnit {
                field: FIELD_METRIC_UNIT,
                unit: "Bogus".to_string()
            })
        );
    }

    #[test]
    fn test_invalid_timestamp() {
        assert_eq!(
            parse(&envelope(
                json!({"metricName": "CPU", "metricValue": 1, "timestamp": "yesterday"})
            )),
            Err(ValidationError::NotANumber {
                field: FIELD_METRIC_TIMESTAMP
            })
        );
    }

    #[test]
    fn test_dimensions_validation() {
        assert!(matches!(
            parse(&envelope(
                json!({"metricName": "CPU", "metricValue": 1, "dimensions": {"name": "a"}})
            )),
            Err(ValidationError::InvalidField {
                field: FIELD_DIMENSIONS,
                ..
            })
        ));
        assert_eq!(
            parse(&envelope(
                json!({"metricName": "CPU", "metricValue": 1, "dimensions": [{"name": "a"}]})
            )),
            Err(ValidationError::MissingDimensionField {
                field: FIELD_DIMENSION_VALUE
            })
        );
        assert_eq!(
            parse(&envelope(
                json!({"metricName": "CPU", "metricValue": 1, "dimensions": [{"value": "a"}]})
            )),
            Err(ValidationError::MissingDimensionField {
                field: FIELD_DIMENSION_NAME
            })
        );
    }

    #[test]
    fn test_too_many_dimensions_rejects_whole_request() {
        let dimensions: Vec<Value> = (0..=MAX_DIMENSIONS_PER_METRIC)
            .map(|i| json!({"name": format!("d{}", i), "value": "x"}))
            .collect();
        let raw = envelope(json!([
            {"metricName": "ok", "metricValue": 1},
            {"metricName": "CPU", "metricValue": 1, "dimensions": dimensions}
        ]));
        assert_eq!(
            parse(&raw),
            Err(ValidationError::TooManyDimensions {
                field: FIELD_DIMENSIONS,
                count: MAX_DIMENSIONS_PER_METRIC + 1,
                max: MAX_DIMENSIONS_PER_METRIC
            })
        );
    }

    #[test]
    fn test_max_dimensions_accepted() {
        let dimensions: Vec<Value> = (0..MAX_DIMENSIONS_PER_METRIC)
            .map(|i| json!({"name": format!("d{}", i), "value": "x"}))
            .collect();
        let request = parse(&envelope(
            json!({"metricName": "CPU", "metricValue": 1, "dimensions": dimensions}),
        ))
        .unwrap();
        assert_eq!(
            request.metric_data[0].dimensions.len(),
            MAX_DIMENSIONS_PER_METRIC
        );
    }

    #[test]
    fn test_parse_message_array_is_all_or_nothing() {
        let ok = envelope(json!({"metricName": "CPU", "metricValue": 1}));
        let bad = envelope(json!({"metricName": "CPU", "metricValue": 1, "unit": "Bogus"}));

        let requests = parse_message(&json!([ok.clone(), ok.clone()])).unwrap();
        assert_eq!(requests.len(), 2);

        assert!(parse_message(&json!([ok, bad])).is_err());
    }

    #[test]
    fn test_parse_slice() {
        let requests = parse_slice(
            br#"{"request": {"namespace": "Demo", "metricData": {"metricName": "CPU", "metricValue": 42}}}"#,
        )
        .unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].namespace, "Demo");

        assert!(matches!(
            parse_slice(b"{not json"),
            Err(ValidationError::InvalidJson(_))
        ));
    }
}
