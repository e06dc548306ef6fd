//! Data models for the live sensor core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---

/// Raw sensor record as delivered by the backend (page item or live event).
///
/// Every field is optional and untyped; the backend has been seen sending
/// numbers as strings. See [`crate::normalize`] for the coercion rules.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawReading {
    // ---
    #[serde(default)]
    pub device_id: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub temperature: Option<Value>,
    #[serde(default)]
    pub humidity: Option<Value>,
    #[serde(default)]
    pub battery_voltage: Option<Value>,
    #[serde(default)]
    pub move_count: Option<Value>,
    #[serde(default)]
    pub field_2: Option<Value>,
}

/// Canonical, immutable sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    // ---
    pub device_id: String,
    /// Source-supplied sequence/time marker (epoch seconds when defaulted).
    pub timestamp: i64,
    /// Wall clock at the moment the record reached the core.
    pub received_at: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    pub battery_voltage: f64,
    pub move_count: u64,
    pub field_2: f64,
}

/// Identity of a reading; two readings with the same key are duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReadingKey {
    pub device_id: String,
    pub timestamp: i64,
}

impl Reading {
    pub fn key(&self) -> ReadingKey {
        ReadingKey {
            device_id: self.device_id.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Warning,
    Critical,
}

/// The threshold rule that produced an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertRule {
    TemperatureLow,
    TemperatureHigh,
    TemperatureCriticalHigh,
    HumidityLow,
    HumidityHigh,
    HumidityCriticalHigh,
    BatteryLow,
    BatteryCriticalLow,
    MoveCountHigh,
}

impl AlertRule {
    /// Severity implied by the rule: `critical_*` thresholds are CRITICAL.
    pub fn severity(self) -> Severity {
        match self {
            AlertRule::TemperatureCriticalHigh
            | AlertRule::HumidityCriticalHigh
            | AlertRule::BatteryCriticalLow => Severity::Critical,
            _ => Severity::Warning,
        }
    }
}

/// A fired threshold rule for one reading. Ephemeral; the consumer owns retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    // ---
    pub id: Uuid,
    pub severity: Severity,
    pub rule: AlertRule,
    pub device_id: String,
    pub message: String,
    /// Observed value that crossed the threshold.
    pub value: f64,
    pub threshold: f64,
    pub reading_timestamp: i64,
    pub raised_at: DateTime<Utc>,
}

/// Running summary statistics for one device (or all devices combined).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    // ---
    pub reading_count: u64,
    pub mean_temperature: f64,
    pub mean_humidity: f64,
    pub total_move_count: u64,
    pub last_reading: Option<Reading>,
}

/// Counters describing what happened to every raw record offered to the core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub accepted: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub out_of_order: u64,
    /// Older than everything retained for a device that is already at its cap.
    pub expired: u64,
    pub alerts_raised: u64,
    pub alerts_dropped: u64,
}
