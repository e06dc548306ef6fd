//! Configuration loader for the `sensorflow-live` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Engine options (retention, thresholds, alert
//! policy) are built here so the rest of the crate never reads `env::var`.
//!
use std::{env, net::SocketAddr, time::Duration};

use anyhow::{anyhow, Result};

use crate::alerts::Thresholds;
use crate::engine::EngineOptions;
use crate::store::Retention;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional threshold: unset keeps the default, `off` disables the rule.
macro_rules! parse_env_threshold {
    ($var_name:expr, $default:expr) => {
        match env::var($var_name).ok().as_deref().map(str::trim) {
            None => $default,
            Some(v) if v.eq_ignore_ascii_case("off") => None,
            Some(v) => Some(
                v.parse()
                    .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?,
            ),
        }
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Sensor data API base URL (historical pages).
    pub api_url: String,

    /// Query parameter carrying the continuation token.
    pub api_token_param: String,

    /// Maximum number of API pages to fetch during backfill (safety limit).
    pub api_max_pages: u32,

    /// Address the HTTP surface binds to.
    pub listen_addr: SocketAddr,

    /// Per-device retention cap.
    pub retention_limit: Retention,

    /// Whether backfilled readings are alert-evaluated.
    pub alert_on_backfill: bool,

    /// Cap on undrained alerts.
    pub alert_queue_limit: Option<usize>,

    /// Delay before the service restarts a failed coordinator.
    pub restart_delay: Duration,

    pub thresholds: Thresholds,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `SENSOR_API_URL` – Sensor data API base URL
///
/// Optional:
/// - `API_TOKEN_PARAM` – continuation token query parameter (default: `cursor`)
/// - `API_MAX_PAGES` – max API pages to fetch (default: 1000)
/// - `LISTEN_ADDR` – bind address (default: `0.0.0.0:8080`)
/// - `RETENTION_LIMIT` – per-device cap or `unbounded` (default: `unbounded`)
/// - `ALERT_ON_BACKFILL` – `true`/`false` (default: `true`)
/// - `ALERT_QUEUE_LIMIT` – undrained alert cap or `unbounded` (default: `unbounded`)
/// - `RESTART_DELAY_SECS` – delay before restarting after a transport failure (default: 5)
/// - `TEMP_LOW`, `TEMP_HIGH`, `TEMP_CRITICAL_HIGH`, `HUMIDITY_LOW`, `HUMIDITY_HIGH`,
///   `HUMIDITY_CRITICAL_HIGH`, `BATTERY_LOW`, `BATTERY_CRITICAL_LOW`, `MOVE_COUNT_HIGH`
///   – alert thresholds, `off` disables a rule
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let api_url = require_env!("SENSOR_API_URL");
    let api_token_param = env::var("API_TOKEN_PARAM")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "cursor".to_string());
    let api_max_pages = parse_env_u32!("API_MAX_PAGES", 1000);

    let listen_addr = env::var("LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse::<SocketAddr>()
        .map_err(|e| anyhow!("Invalid LISTEN_ADDR: {}", e))?;

    let retention_limit = parse_limit("RETENTION_LIMIT")?
        .map(Retention::Limit)
        .unwrap_or(Retention::Unbounded);
    let alert_queue_limit = parse_limit("ALERT_QUEUE_LIMIT")?;

    let alert_on_backfill = match env::var("ALERT_ON_BACKFILL").ok().as_deref() {
        None => true,
        Some(v) => parse_bool(v).ok_or_else(|| anyhow!("Invalid ALERT_ON_BACKFILL: {}", v))?,
    };

    let restart_delay = Duration::from_secs(parse_env_u32!("RESTART_DELAY_SECS", 5).into());

    let defaults = Thresholds::default();
    let mut thresholds = defaults;
    thresholds.temperature.low = parse_env_threshold!("TEMP_LOW", defaults.temperature.low);
    thresholds.temperature.high = parse_env_threshold!("TEMP_HIGH", defaults.temperature.high);
    thresholds.temperature.critical_high =
        parse_env_threshold!("TEMP_CRITICAL_HIGH", defaults.temperature.critical_high);
    thresholds.humidity.low = parse_env_threshold!("HUMIDITY_LOW", defaults.humidity.low);
    thresholds.humidity.high = parse_env_threshold!("HUMIDITY_HIGH", defaults.humidity.high);
    thresholds.humidity.critical_high =
        parse_env_threshold!("HUMIDITY_CRITICAL_HIGH", defaults.humidity.critical_high);
    thresholds.battery_voltage.low =
        parse_env_threshold!("BATTERY_LOW", defaults.battery_voltage.low);
    thresholds.battery_voltage.critical_low =
        parse_env_threshold!("BATTERY_CRITICAL_LOW", defaults.battery_voltage.critical_low);
    thresholds.move_count.high = parse_env_threshold!("MOVE_COUNT_HIGH", defaults.move_count.high);

    Ok(Config {
        api_url,
        api_token_param,
        api_max_pages,
        listen_addr,
        retention_limit,
        alert_on_backfill,
        alert_queue_limit,
        restart_delay,
        thresholds,
    })
}

/// `unbounded`/unset → `None`, otherwise a non-negative integer.
fn parse_limit(var_name: &str) -> Result<Option<usize>> {
    // ---
    match env::var(var_name).ok() {
        None => Ok(None),
        Some(v) => match v.parse::<Retention>() {
            Ok(Retention::Unbounded) => Ok(None),
            Ok(Retention::Limit(n)) => Ok(Some(n)),
            Err(e) => Err(anyhow!("Invalid {}: {}", var_name, e)),
        },
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Engine options derived from this configuration.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            retention_limit: self.retention_limit,
            thresholds: self.thresholds,
            alert_on_backfill: self.alert_on_backfill,
            alert_queue_limit: self.alert_queue_limit,
        }
    }

    /// Log the loaded configuration for debugging purposes.
    pub fn log_config(&self) {
        // ---
        let queue = self
            .alert_queue_limit
            .map_or_else(|| "unbounded".to_string(), |n| n.to_string());

        tracing::info!("Configuration loaded:");
        tracing::info!("  SENSOR_API_URL    : {}", self.api_url);
        tracing::info!("  API_TOKEN_PARAM   : {}", self.api_token_param);
        tracing::info!("  API_MAX_PAGES     : {}", self.api_max_pages);
        tracing::info!("  LISTEN_ADDR       : {}", self.listen_addr);
        tracing::info!("  RETENTION_LIMIT   : {}", self.retention_limit);
        tracing::info!("  ALERT_ON_BACKFILL : {}", self.alert_on_backfill);
        tracing::info!("  ALERT_QUEUE_LIMIT : {}", queue);
        tracing::info!("  RESTART_DELAY     : {:?}", self.restart_delay);
        tracing::info!("  THRESHOLDS        : {:?}", self.thresholds);
    }
}
