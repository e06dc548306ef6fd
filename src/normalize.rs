//! Reading normalizer.
//!
//! Turns whatever the backend delivered into a canonical [`Reading`]. The only
//! rejection is a payload that is not a record at all; every missing or
//! unusable field is defaulted instead:
//! - `device_id` absent, empty or not a string → `"unknown"`
//! - numeric fields absent or non-numeric → `0`
//! - `timestamp` absent or non-numeric → ingestion time in epoch seconds
//!
//! `received_at` always comes from the caller, never from the payload.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::CoreError;
use crate::models::{RawReading, Reading};

pub const UNKNOWN_DEVICE: &str = "unknown";

// ---

/// Normalize one raw JSON record received at `received_at`.
pub fn normalize(value: Value, received_at: DateTime<Utc>) -> Result<Reading, CoreError> {
    // ---
    if !value.is_object() {
        return Err(CoreError::malformed(format!(
            "expected a record, got {}",
            json_kind(&value)
        )));
    }

    let raw: RawReading =
        serde_json::from_value(value).map_err(|e| CoreError::malformed(e.to_string()))?;

    Ok(raw.to_reading(received_at))
}

impl RawReading {
    // ---
    pub fn to_reading(&self, received_at: DateTime<Utc>) -> Reading {
        // ---
        let device_id = match self.device_id.as_ref() {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => UNKNOWN_DEVICE.to_string(),
        };

        let timestamp = self
            .timestamp
            .as_ref()
            .and_then(as_i64)
            .unwrap_or_else(|| received_at.timestamp());

        let move_count = self
            .move_count
            .as_ref()
            .and_then(as_i64)
            .filter(|m| *m > 0)
            .map(|m| m as u64)
            .unwrap_or(0);

        Reading {
            device_id,
            timestamp,
            received_at,
            temperature: number_or_zero(self.temperature.as_ref()),
            humidity: number_or_zero(self.humidity.as_ref()),
            battery_voltage: number_or_zero(self.battery_voltage.as_ref()),
            move_count,
            field_2: number_or_zero(self.field_2.as_ref()),
        }
    }
}

fn number_or_zero(value: Option<&Value>) -> f64 {
    value.and_then(as_f64).unwrap_or(0.0)
}

/// Finite number from a JSON number or a numeric string.
fn as_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Integer from a JSON number or a numeric string. Integers are taken exactly;
/// fractional input is truncated.
fn as_i64(value: &Value) -> Option<i64> {
    let exact = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    exact.or_else(|| as_f64(value).map(|n| n as i64))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap()
    }

    #[test]
    fn test_full_record() {
        // ---
        let value = json!({
            "device_id": "sensor-A",
            "timestamp": 1700000000,
            "temperature": 22.4,
            "humidity": 51.0,
            "battery_voltage": 3.1,
            "move_count": 7,
            "field_2": 1.5,
            "received_at": "2020-01-01T00:00:00Z"
        });

        let reading = normalize(value, received()).unwrap();

        assert_eq!(reading.device_id, "sensor-A");
        assert_eq!(reading.timestamp, 1_700_000_000);
        assert_eq!(reading.temperature, 22.4);
        assert_eq!(reading.humidity, 51.0);
        assert_eq!(reading.battery_voltage, 3.1);
        assert_eq!(reading.move_count, 7);
        assert_eq!(reading.field_2, 1.5);
        // Source-provided received_at is ignored
        assert_eq!(reading.received_at, received());
    }

    #[test]
    fn test_missing_fields_are_defaulted() {
        // ---
        let reading = normalize(json!({}), received()).unwrap();

        assert_eq!(reading.device_id, UNKNOWN_DEVICE);
        assert_eq!(reading.timestamp, received().timestamp());
        assert_eq!(reading.temperature, 0.0);
        assert_eq!(reading.humidity, 0.0);
        assert_eq!(reading.battery_voltage, 0.0);
        assert_eq!(reading.move_count, 0);
        assert_eq!(reading.field_2, 0.0);
    }

    #[test]
    fn test_null_and_non_numeric_fields() {
        // ---
        let value = json!({
            "device_id": "",
            "timestamp": null,
            "temperature": "warm",
            "humidity": true,
            "battery_voltage": [3.3],
            "move_count": null
        });

        let reading = normalize(value, received()).unwrap();

        assert_eq!(reading.device_id, UNKNOWN_DEVICE);
        assert_eq!(reading.timestamp, received().timestamp());
        assert_eq!(reading.temperature, 0.0);
        assert_eq!(reading.humidity, 0.0);
        assert_eq!(reading.battery_voltage, 0.0);
        assert_eq!(reading.move_count, 0);
    }

    #[test]
    fn test_numeric_strings_are_parsed() {
        // ---
        let value = json!({
            "device_id": "sensor-B",
            "timestamp": "1700000123",
            "temperature": "19.5",
            "move_count": "12"
        });

        let reading = normalize(value, received()).unwrap();

        assert_eq!(reading.timestamp, 1_700_000_123);
        assert_eq!(reading.temperature, 19.5);
        assert_eq!(reading.move_count, 12);
    }

    #[test]
    fn test_large_timestamps_keep_full_precision() {
        // ---
        let first = normalize(json!({"timestamp": 9_007_199_254_740_992_i64}), received()).unwrap();
        let second = normalize(json!({"timestamp": 9_007_199_254_740_993_i64}), received()).unwrap();
        let quoted = normalize(json!({"timestamp": "9007199254740993"}), received()).unwrap();

        assert_eq!(first.timestamp, 9_007_199_254_740_992);
        assert_eq!(second.timestamp, 9_007_199_254_740_993);
        assert_eq!(quoted.timestamp, 9_007_199_254_740_993);
        assert_ne!(first.key(), second.key());

        let fractional = normalize(json!({"timestamp": "1700000123.75"}), received()).unwrap();
        assert_eq!(fractional.timestamp, 1_700_000_123);
    }

    #[test]
    fn test_move_count_is_non_negative_integer() {
        // ---
        let negative = normalize(json!({"move_count": -4}), received()).unwrap();
        assert_eq!(negative.move_count, 0);

        let fractional = normalize(json!({"move_count": 3.9}), received()).unwrap();
        assert_eq!(fractional.move_count, 3);
    }

    #[test]
    fn test_non_record_is_rejected() {
        // ---
        for value in [json!(null), json!(42), json!("reading"), json!([1, 2, 3])] {
            let err = normalize(value, received()).unwrap_err();
            assert!(matches!(err, CoreError::MalformedReading(_)));
        }
    }
}
