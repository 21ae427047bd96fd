//! Inbound message fixtures

use serde_json::{Value, json};

/// One envelope with one datum and nothing optional.
pub fn demo_single_datum() -> Value {
    json!({
        "request": {
            "namespace": "Demo",
            "metricData": {"metricName": "CPU", "metricValue": 42}
        }
    })
}

/// A message made of two envelopes.
pub fn demo_list() -> Value {
    json!([
        {
            "request": {
                "namespace": "Demo",
                "metricData": {"metricName": "CPU", "metricValue": 42, "unit": "Percent"}
            }
        },
        {
            "request": {
                "namespace": "Demo",
                "metricData": {
                    "metricName": "Memory",
                    "metricValue": 512,
                    "unit": "Megabytes",
                    "timestamp": 1704067200000i64,
                    "dimensions": [{"name": "process", "value": "agent"}]
                }
            }
        }
    ])
}

pub fn invalid_unit() -> Value {
    json!({
        "request": {
            "namespace": "Demo",
            "metricData": {"metricName": "CPU", "metricValue": 42, "unit": "Bogus"}
        }
    })
}

pub fn too_many_dimensions() -> Value {
    let dimensions: Vec<Value> = (0..12)
        .map(|i| json!({"name": format!("d{}", i), "value": "x"}))
        .collect();
    json!({
        "request": {
            "namespace": "Demo",
            "metricData": [
                {"metricName": "ok", "metricValue": 1},
                {"metricName": "CPU", "metricValue": 42, "dimensions": dimensions}
            ]
        }
    })
}
