//! Threshold alert engine.
//!
//! [`evaluate`] is a stateless mapping from one reading plus a threshold
//! configuration to the alerts it fires. Rules are independent: temperature,
//! humidity, battery and movement may all fire for the same reading, but each
//! rule group fires at most once (its most severe condition). Comparisons are
//! strict, a value equal to a threshold is in range.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Alert, AlertRule, Reading};

// ---

/// Thresholds for a value that can be too low or too high.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeThresholds {
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub critical_high: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BatteryThresholds {
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub critical_low: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveCountThresholds {
    #[serde(default)]
    pub high: Option<u64>,
}

/// Full alert configuration. An unset threshold disables that rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default)]
    pub temperature: RangeThresholds,
    #[serde(default)]
    pub humidity: RangeThresholds,
    #[serde(default)]
    pub battery_voltage: BatteryThresholds,
    #[serde(default)]
    pub move_count: MoveCountThresholds,
}

impl Thresholds {
    /// No rule configured; nothing ever fires.
    pub fn none() -> Self {
        Self {
            temperature: RangeThresholds::default(),
            humidity: RangeThresholds::default(),
            battery_voltage: BatteryThresholds::default(),
            move_count: MoveCountThresholds::default(),
        }
    }
}

impl Default for Thresholds {
    /// Dashboard defaults: hot and humid are critical, cold and dry are warnings.
    fn default() -> Self {
        Self {
            temperature: RangeThresholds {
                low: Some(10.0),
                high: None,
                critical_high: Some(30.0),
            },
            humidity: RangeThresholds {
                low: Some(20.0),
                high: None,
                critical_high: Some(80.0),
            },
            battery_voltage: BatteryThresholds {
                low: None,
                critical_low: Some(2.5),
            },
            move_count: MoveCountThresholds { high: Some(100) },
        }
    }
}

/// Evaluate every rule group against one reading.
pub fn evaluate(reading: &Reading, thresholds: &Thresholds) -> Vec<Alert> {
    // ---
    let mut alerts = Vec::new();

    if let Some((rule, limit)) = range_breach(
        reading.temperature,
        &thresholds.temperature,
        [
            AlertRule::TemperatureCriticalHigh,
            AlertRule::TemperatureHigh,
            AlertRule::TemperatureLow,
        ],
    ) {
        let message = match rule {
            AlertRule::TemperatureLow => format!("Low temperature detected: {}°C", reading.temperature),
            AlertRule::TemperatureCriticalHigh => {
                format!("Critical temperature detected: {}°C", reading.temperature)
            }
            _ => format!("High temperature detected: {}°C", reading.temperature),
        };
        alerts.push(build(reading, rule, reading.temperature, limit, message));
    }

    if let Some((rule, limit)) = range_breach(
        reading.humidity,
        &thresholds.humidity,
        [
            AlertRule::HumidityCriticalHigh,
            AlertRule::HumidityHigh,
            AlertRule::HumidityLow,
        ],
    ) {
        let message = match rule {
            AlertRule::HumidityLow => format!("Low humidity detected: {}%", reading.humidity),
            AlertRule::HumidityCriticalHigh => {
                format!("Critical humidity detected: {}%", reading.humidity)
            }
            _ => format!("High humidity detected: {}%", reading.humidity),
        };
        alerts.push(build(reading, rule, reading.humidity, limit, message));
    }

    let battery = &thresholds.battery_voltage;
    let voltage = reading.battery_voltage;
    let battery_rule = match (battery.critical_low, battery.low) {
        (Some(limit), _) if voltage < limit => Some((AlertRule::BatteryCriticalLow, limit)),
        (_, Some(limit)) if voltage < limit => Some((AlertRule::BatteryLow, limit)),
        _ => None,
    };
    if let Some((rule, limit)) = battery_rule {
        let message = match rule {
            AlertRule::BatteryCriticalLow => format!("Critically low battery: {voltage}V"),
            _ => format!("Low battery: {voltage}V"),
        };
        alerts.push(build(reading, rule, voltage, limit, message));
    }

    if let Some(limit) = thresholds.move_count.high {
        if reading.move_count > limit {
            let message = format!("High movement detected: {} movements", reading.move_count);
            alerts.push(build(
                reading,
                AlertRule::MoveCountHigh,
                reading.move_count as f64,
                limit as f64,
                message,
            ));
        }
    }

    alerts
}

/// Most severe breached condition for a low/high/critical_high group.
///
/// `rules` is `[critical_high, high, low]`.
fn range_breach(
    value: f64,
    limits: &RangeThresholds,
    rules: [AlertRule; 3],
) -> Option<(AlertRule, f64)> {
    let [critical_high, high, low] = rules;
    match (limits.critical_high, limits.high, limits.low) {
        (Some(limit), _, _) if value > limit => Some((critical_high, limit)),
        (_, Some(limit), _) if value > limit => Some((high, limit)),
        (_, _, Some(limit)) if value < limit => Some((low, limit)),
        _ => None,
    }
}

fn build(reading: &Reading, rule: AlertRule, value: f64, threshold: f64, message: String) -> Alert {
    Alert {
        id: Uuid::new_v4(),
        severity: rule.severity(),
        rule,
        device_id: reading.device_id.clone(),
        message,
        value,
        threshold,
        reading_timestamp: reading.timestamp,
        raised_at: reading.received_at,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::Severity;
    use chrono::{TimeZone, Utc};

    fn reading(temp: f64, humidity: f64, battery: f64, moves: u64) -> Reading {
        Reading {
            device_id: "device-A".to_string(),
            timestamp: 42,
            received_at: Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap(),
            temperature: temp,
            humidity,
            battery_voltage: battery,
            move_count: moves,
            field_2: 0.0,
        }
    }

    fn temperature_only(high: f64, critical_high: f64) -> Thresholds {
        Thresholds {
            temperature: RangeThresholds {
                low: None,
                high: Some(high),
                critical_high: Some(critical_high),
            },
            ..Thresholds::none()
        }
    }

    fn rules(alerts: &[Alert]) -> Vec<AlertRule> {
        alerts.iter().map(|a| a.rule).collect()
    }

    #[test]
    fn test_temperature_tiers() {
        // ---
        let thresholds = temperature_only(30.0, 40.0);

        let warm = evaluate(&reading(35.0, 50.0, 3.0, 0), &thresholds);
        assert_eq!(warm.len(), 1);
        assert_eq!(warm[0].severity, Severity::Warning);
        assert_eq!(warm[0].rule, AlertRule::TemperatureHigh);

        let hot = evaluate(&reading(45.0, 50.0, 3.0, 0), &thresholds);
        assert_eq!(hot.len(), 1);
        assert_eq!(hot[0].severity, Severity::Critical);
        assert_eq!(hot[0].rule, AlertRule::TemperatureCriticalHigh);

        assert!(evaluate(&reading(25.0, 50.0, 3.0, 0), &thresholds).is_empty());
    }

    #[test]
    fn test_boundaries_are_in_range() {
        // ---
        let thresholds = temperature_only(30.0, 40.0);
        assert!(evaluate(&reading(30.0, 50.0, 3.0, 0), &thresholds).is_empty());

        let at_critical = evaluate(&reading(40.0, 50.0, 3.0, 0), &thresholds);
        assert_eq!(rules(&at_critical), vec![AlertRule::TemperatureHigh]);
    }

    #[test]
    fn test_all_groups_fire_independently() {
        // ---
        let thresholds = Thresholds {
            temperature: RangeThresholds {
                low: Some(10.0),
                high: Some(30.0),
                critical_high: None,
            },
            humidity: RangeThresholds {
                low: Some(20.0),
                high: Some(70.0),
                critical_high: Some(90.0),
            },
            battery_voltage: BatteryThresholds {
                low: Some(3.0),
                critical_low: Some(2.5),
            },
            move_count: MoveCountThresholds { high: Some(100) },
        };

        let alerts = evaluate(&reading(5.0, 95.0, 2.7, 150), &thresholds);
        assert_eq!(
            rules(&alerts),
            vec![
                AlertRule::TemperatureLow,
                AlertRule::HumidityCriticalHigh,
                AlertRule::BatteryLow,
                AlertRule::MoveCountHigh,
            ]
        );

        let severities: Vec<Severity> = alerts.iter().map(|a| a.severity).collect();
        assert_eq!(
            severities,
            vec![
                Severity::Warning,
                Severity::Critical,
                Severity::Warning,
                Severity::Warning
            ]
        );

        let dead_battery = evaluate(&reading(20.0, 50.0, 2.0, 0), &thresholds);
        assert_eq!(rules(&dead_battery), vec![AlertRule::BatteryCriticalLow]);
        assert_eq!(dead_battery[0].severity, Severity::Critical);
    }

    #[test]
    fn test_default_thresholds() {
        // ---
        let defaults = Thresholds::default();

        assert!(evaluate(&reading(22.0, 50.0, 3.3, 10), &defaults).is_empty());

        let hot = evaluate(&reading(31.0, 50.0, 3.3, 10), &defaults);
        assert_eq!(rules(&hot), vec![AlertRule::TemperatureCriticalHigh]);
        assert_eq!(hot[0].message, "Critical temperature detected: 31°C");

        let cold = evaluate(&reading(8.5, 15.0, 2.4, 101), &defaults);
        assert_eq!(
            rules(&cold),
            vec![
                AlertRule::TemperatureLow,
                AlertRule::HumidityLow,
                AlertRule::BatteryCriticalLow,
                AlertRule::MoveCountHigh,
            ]
        );
    }

    #[test]
    fn test_alert_carries_reading_context() {
        // ---
        let r = reading(45.0, 50.0, 3.0, 0);
        let alerts = evaluate(&r, &temperature_only(30.0, 40.0));

        assert_eq!(alerts[0].device_id, "device-A");
        assert_eq!(alerts[0].reading_timestamp, 42);
        assert_eq!(alerts[0].raised_at, r.received_at);
        assert_eq!(alerts[0].value, 45.0);
        assert_eq!(alerts[0].threshold, 40.0);
    }

    #[test]
    fn test_partial_configuration_deserializes() {
        // ---
        let thresholds: Thresholds =
            serde_json::from_str(r#"{"temperature": {"high": 30, "critical_high": 40}}"#).unwrap();

        assert_eq!(thresholds.temperature.high, Some(30.0));
        assert_eq!(thresholds.temperature.low, None);
        assert_eq!(thresholds.move_count.high, None);
    }
}
